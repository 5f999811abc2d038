//! End-to-end flows through router, manager and dispatcher with scripted
//! browser sessions standing in for Chrome.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_test::assert_ok;

use crawler::http::HttpResponse;
use crawler::testing::{Script, ScriptedFactory};
use crawler::{
    AccessEvent, AccessManager, Admission, BrowserKind, CrawlError, DownloadDispatcher, Fallback,
    Output, Request, RequestRouter, Response, Settings,
};

#[derive(Default)]
struct StubFallback {
    calls: AtomicUsize,
}

#[async_trait]
impl Fallback for StubFallback {
    async fn download_request(&self, request: Request) -> crawler::Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Response::Http(HttpResponse {
            request,
            status: 200,
            body: "<html></html>".to_string(),
        }))
    }
}

struct Harness {
    factory: ScriptedFactory,
    manager: Arc<AccessManager>,
    router: Arc<RequestRouter>,
    dispatcher: Arc<DownloadDispatcher>,
    fallback: Arc<StubFallback>,
}

fn harness(hang_timeout_secs: Option<u64>) -> Harness {
    let settings = Settings {
        browser: Some(BrowserKind::Chrome),
        hang_timeout_secs,
        ..Default::default()
    };
    let factory = ScriptedFactory::new();
    let manager = Arc::new(AccessManager::new(Arc::new(factory.clone())));
    let fallback = Arc::new(StubFallback::default());
    let router = Arc::new(RequestRouter::from_settings(&settings, manager.clone()).unwrap());
    let dispatcher = Arc::new(DownloadDispatcher::new(manager.clone(), &settings, fallback.clone()));
    Harness {
        factory,
        manager,
        router,
        dispatcher,
        fallback,
    }
}

/// Pages under /bad can't be parsed; everything else yields its URL
fn parse(response: &Response) -> crawler::Result<Vec<Output<String>>> {
    if let Response::Browser(browser) = response {
        if browser.failure().is_some() {
            return Ok(Vec::new());
        }
    }
    if response.url().path().starts_with("/bad") {
        return Err(CrawlError::IgnoreRequest(format!("can't parse {}", response.url())));
    }
    Ok(vec![Output::Item(response.url().to_string())])
}

/// A small concurrent crawl loop: a dedup filter honoring `dont_filter`,
/// every scheduled request downloaded and parsed on its own task
async fn crawl(h: &Harness, start: Vec<Output<String>>) -> Vec<String> {
    let mut items = Vec::new();
    let mut seen = HashSet::new();
    let mut tasks = JoinSet::new();
    let mut pending: VecDeque<_> = h.router.process_start_requests(start).await.unwrap().into();

    loop {
        while let Some(output) = pending.pop_front() {
            let request = match output {
                Output::Item(item) => {
                    items.push(item);
                    continue;
                }
                Output::Request(request) => request,
            };
            if !seen.insert(request.id().clone()) && !request.dont_filter {
                continue;
            }

            let router = h.router.clone();
            let dispatcher = h.dispatcher.clone();
            tasks.spawn(async move {
                let response = dispatcher.download_request(request.clone()).await.unwrap();
                let response = router.process_response(response);
                match parse(&response) {
                    Ok(result) => router.process_spider_output(&request, result).await,
                    Err(error) => router
                        .process_spider_exception(&request, &error)
                        .await
                        .map(Output::Request)
                        .into_iter()
                        .collect(),
                }
            });
        }

        match tasks.join_next().await {
            Some(joined) => pending.extend(joined.unwrap()),
            None => break,
        }
    }
    items
}

fn browser(url: &str) -> Output<String> {
    Output::Request(Request::browser(url).unwrap())
}

#[tokio::test]
async fn test_two_requests_take_turns() {
    let h = harness(None);
    let r1 = Request::browser("https://one.test/").unwrap();
    let r2 = Request::browser("https://two.test/").unwrap();

    let start = vec![Output::<String>::Request(r1.clone()), Output::Request(r2.clone())];
    let admitted = h.router.process_start_requests(start).await.unwrap();
    assert_eq!(admitted.len(), 1);
    assert_eq!(h.manager.queue_len().await, 1);

    let response = h.dispatcher.download_request(r1.clone()).await.unwrap();
    match &response {
        Response::Browser(b) => assert!(b.session().is_some()),
        Response::Http(_) => panic!("Expected browser response"),
    }

    let output = h.router.process_spider_output(&r1, parse(&response).unwrap()).await;
    let replay = output
        .iter()
        .find_map(Output::as_request)
        .cloned()
        .expect("r2 replayed");
    assert_eq!(replay.id(), r2.id());
    assert!(replay.dont_filter);
    assert_eq!(h.manager.held_by().await, Some(r2.id().clone()));

    let response = h.dispatcher.download_request(replay.clone()).await.unwrap();
    let output = h.router.process_spider_output(&replay, parse(&response).unwrap()).await;
    assert!(output.iter().all(|o| o.as_request().is_none()));

    assert_eq!(h.manager.held_by().await, None);
    assert_eq!(h.manager.queue_len().await, 0);
    assert_eq!(h.factory.loads(), vec!["https://one.test/", "https://two.test/"]);
}

#[tokio::test]
async fn test_crawl_serializes_browser_and_keeps_fifo() {
    let h = harness(None);
    for url in ["https://a.test/", "https://b.test/", "https://c.test/", "https://d.test/"] {
        h.factory.script(url, Script::Slow(Duration::from_millis(20)));
    }
    let start = vec![
        browser("https://a.test/"),
        browser("https://b.test/"),
        Output::Request(Request::http("https://plain.test/").unwrap()),
        browser("https://c.test/"),
        browser("https://d.test/"),
    ];

    let items = crawl(&h, start).await;

    assert_eq!(
        h.factory.loads(),
        vec!["https://a.test/", "https://b.test/", "https://c.test/", "https://d.test/"]
    );
    assert_eq!(h.factory.max_concurrent_loads(), 1);
    assert_eq!(items.len(), 5);
    assert_eq!(h.fallback.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.manager.held_by().await, None);
    assert_eq!(h.manager.queue_len().await, 0);
}

#[tokio::test]
async fn test_parse_failure_does_not_stall_queue() {
    let h = harness(None);
    let start = vec![
        browser("https://site.test/bad"),
        browser("https://site.test/good-1"),
        browser("https://site.test/good-2"),
    ];

    let items = crawl(&h, start).await;

    assert_eq!(items, vec!["https://site.test/good-1", "https://site.test/good-2"]);
    assert_eq!(h.manager.held_by().await, None);
}

#[tokio::test]
async fn test_failed_download_still_hands_over() {
    let h = harness(None);
    h.factory.script("https://down.test/", Script::Fail("net::ERR_CONNECTION_REFUSED".to_string()));
    let start = vec![browser("https://down.test/"), browser("https://up.test/")];

    let items = crawl(&h, start).await;

    assert_eq!(items, vec!["https://up.test/"]);
    assert_eq!(h.factory.loads(), vec!["https://down.test/", "https://up.test/"]);
}

#[tokio::test]
async fn test_hang_frees_browser_for_next_request() {
    let h = harness(Some(1));
    h.factory.script("https://stuck.test/", Script::Hang);
    let mut events = h.manager.events().subscribe();

    let r1 = Request::browser("https://stuck.test/").unwrap();
    assert!(matches!(h.manager.acquire(r1.clone()).await, Admission::Admitted(_)));
    let dispatcher = h.dispatcher.clone();
    let stuck = tokio::spawn(async move { dispatcher.download_request(r1).await });

    // Wait for the watchdog, not for the stuck load
    let detected = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(AccessEvent::HangDetected { .. }) = events.recv().await {
                return;
            }
        }
    })
    .await;
    assert_ok!(detected);

    let r2 = Request::browser("https://next.test/").unwrap();
    assert!(matches!(h.manager.acquire(r2.clone()).await, Admission::Admitted(_)));
    let response = h.dispatcher.download_request(r2).await.unwrap();
    match response {
        Response::Browser(b) => {
            let body = b.body().await.unwrap();
            assert!(body.contains("session 2"), "fresh session expected, got {}", body);
        }
        Response::Http(_) => panic!("Expected browser response"),
    }

    let stuck = stuck.await.unwrap().unwrap();
    match stuck {
        Response::Browser(b) => assert!(matches!(
            b.failure().map(|f| &f.error),
            Some(CrawlError::HangTimeout { .. })
        )),
        Response::Http(_) => panic!("Expected browser response"),
    }

    assert_eq!(h.factory.launches(), 2);
    assert_eq!(h.manager.held_by().await, None);
}

#[tokio::test]
async fn test_start_batch_with_action_is_rejected() {
    let h = harness(None);
    let start = vec![
        browser("https://a.test/"),
        Output::Request(Request::action("https://a.test/", Vec::new()).unwrap()),
    ];

    let result = h.router.process_start_requests(start).await;

    assert!(matches!(result, Err(CrawlError::IgnoreRequest(_))));
    assert_eq!(h.manager.held_by().await, None);
    assert!(h.factory.loads().is_empty());
}

#[tokio::test]
async fn test_abandoned_load_leaves_retry_holding_lock() {
    let h = harness(Some(1));
    h.factory
        .script("https://same.test/", Script::Hang)
        .relaunch_delay(Duration::from_millis(500));
    let mut events = h.manager.events().subscribe();

    let first = Request::browser("https://same.test/").unwrap();
    assert!(matches!(h.manager.acquire(first.clone()).await, Admission::Admitted(_)));
    let dispatcher = h.dispatcher.clone();
    let stuck = tokio::spawn(async move { dispatcher.download_request(first).await });

    let detected = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(AccessEvent::HangDetected { .. }) = events.recv().await {
                return;
            }
        }
    })
    .await;
    assert_ok!(detected);

    // Same URL, so same id, admitted while the abandoned load is still relaunching
    let retry = Request::browser("https://same.test/").unwrap().replace_dont_filter();
    let retry_id = retry.id().clone();
    assert!(matches!(h.manager.acquire(retry).await, Admission::Admitted(_)));

    let stuck = stuck.await.unwrap().unwrap();
    match stuck {
        Response::Browser(b) => assert!(matches!(
            b.failure().map(|f| &f.error),
            Some(CrawlError::HangTimeout { .. })
        )),
        Response::Http(_) => panic!("Expected browser response"),
    }
    assert_eq!(h.factory.launches(), 2);

    assert_eq!(h.manager.held_by().await, Some(retry_id));
    let other = Request::browser("https://other.test/").unwrap();
    assert!(matches!(h.manager.acquire(other).await, Admission::Waiting));
}
