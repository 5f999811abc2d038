//! Launch Chrome, load a page and print its title

use browser::{Chrome, LaunchOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://www.rust-lang.org".to_string());

    let chrome = Chrome::launch(&LaunchOptions::default()).await?;
    println!("Chrome running, pid {:?}", chrome.pid());

    chrome.page().navigate(&url).await?;
    let title = chrome.page().evaluate("document.title").await?;
    println!("{} -> {}", url, title);

    let html = chrome.page().content().await?;
    println!("{} bytes of HTML", html.len());

    chrome.close().await?;
    Ok(())
}
