//! Crawl a few pages through one shared Chrome
//!
//! ```text
//! cargo run -p crawler --example crawl -- https://www.rust-lang.org https://crates.io
//! ```

use std::collections::VecDeque;

use crawler::{
    AccessManager, DownloadDispatcher, Output, Query, Request, RequestRouter, Response, Settings,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let settings = Settings::from_json(
        r#"{ "browser": "chrome", "timeout_secs": 20, "hang_timeout_secs": 30 }"#,
    )?;
    let manager = AccessManager::from_settings(&settings);
    let router = RequestRouter::from_settings(&settings, manager.clone())?;
    let dispatcher = DownloadDispatcher::from_settings(manager, &settings)?;

    let mut start: Vec<Output<String>> = Vec::new();
    for url in std::env::args().skip(1) {
        start.push(Output::Request(Request::browser(&url)?));
    }

    let mut pending: VecDeque<_> = router.process_start_requests(start).await?.into();
    while let Some(output) = pending.pop_front() {
        let request = match output {
            Output::Item(title) => {
                println!("{}", title);
                continue;
            }
            Output::Request(request) => request,
        };

        let response = router.process_response(dispatcher.download_request(request.clone()).await?);
        let mut items = Vec::new();
        if let Response::Browser(page) = &response {
            if let Some(selector) = page.selector() {
                let title = selector.extract_first(&Query::css("title::text")).await?;
                let links = selector.css("a::attr(href)").await?;
                items.push(Output::Item(format!(
                    "{} | {} | {} links",
                    page.url(),
                    title.unwrap_or_default(),
                    links.len()
                )));
            }
        }

        pending.extend(router.process_spider_output(&request, items).await);
    }

    dispatcher.close().await?;
    Ok(())
}
