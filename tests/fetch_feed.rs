//! Integration tests: fetch fixture feeds from a local HTTP server.
//!
//! Each test starts its own wiremock server and runs the real reqwest
//! fetcher and XML decoder end to end.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use feedpull::{
    FeedEntry, FeedFormat, FeedMeta, FetchRequest, ReqwestFetcher, RequestOptions,
    TransportError, fetch_feed,
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SIMPLE_RSS: &str = include_str!("fixtures/simple-rss.xml");
const SIMPLE_RSS_NO_SELF_LINK: &str = include_str!("fixtures/simple-rss-no-self-link.xml");
const SIMPLE_ATOM: &str = include_str!("fixtures/simple-atom.xml");
const SIMPLE_ATOM_NO_SELF_LINK: &str = include_str!("fixtures/simple-atom-no-self-link.xml");

async fn serve(body: &str, mime: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/subject.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), mime))
        .mount(&server)
        .await;
    server
}

struct Collected {
    info: Arc<Mutex<Vec<FeedMeta>>>,
    entries: Arc<Mutex<Vec<FeedEntry>>>,
}

fn collecting_request(url: &str) -> (FetchRequest, Collected) {
    let collected = Collected {
        info: Arc::new(Mutex::new(Vec::new())),
        entries: Arc::new(Mutex::new(Vec::new())),
    };

    let info = collected.info.clone();
    let entries = collected.entries.clone();
    let request = FetchRequest::new(url)
        .on_info(move |meta| {
            info.lock().unwrap().push(meta);
            async { Ok(()) }
        })
        .on_entry(move |entry| {
            entries.lock().unwrap().push(entry);
            async { Ok(()) }
        });

    (request, collected)
}

// ============================================================================
// Fixture feeds
// ============================================================================

#[tokio::test]
async fn test_simple_rss_feed() {
    let server = serve(SIMPLE_RSS, "application/rss+xml").await;
    let url = format!("{}/subject.xml", server.uri());
    let (request, collected) = collecting_request(&url);

    let summary = fetch_feed(&ReqwestFetcher::new(), request).await.unwrap();

    assert_eq!(summary.url, "https://example.com/feed.xml");
    assert_eq!(summary.title.as_deref(), Some("Mock Feed"));
    assert_eq!(summary.entry_count, 2);

    let info = collected.info.lock().unwrap();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].format, FeedFormat::Rss);
    assert_eq!(info[0].xml_url.as_deref(), Some("https://example.com/feed.xml"));
    assert_eq!(info[0].language.as_deref(), Some("en-gb"));
    assert_eq!(
        info[0].updated.map(|dt| dt.to_rfc3339()).as_deref(),
        Some("2024-01-02T09:00:00+00:00")
    );

    let entries = collected.entries.lock().unwrap();
    let titles: Vec<_> = entries.iter().map(|e| e.title.clone().unwrap()).collect();
    assert_eq!(titles, vec!["Mock Item 1", "Mock Item 2"]);
    assert_eq!(entries[0].author.as_deref(), Some("Mock Author"));
    assert_eq!(entries[1].summary.as_deref(), Some("Mock item <em>two</em>"));
    assert_eq!(entries[1].categories, vec!["mock"]);
}

#[tokio::test]
async fn test_simple_rss_feed_without_self_link() {
    let server = serve(SIMPLE_RSS_NO_SELF_LINK, "application/rss+xml").await;
    let url = format!("{}/subject.xml", server.uri());
    let (request, collected) = collecting_request(&url);

    let summary = fetch_feed(&ReqwestFetcher::new(), request).await.unwrap();

    assert_eq!(summary.url, url);
    assert_eq!(summary.title.as_deref(), Some("Mock Feed"));
    assert_eq!(summary.entry_count, 2);

    let info = collected.info.lock().unwrap();
    assert_eq!(info[0].xml_url.as_deref(), Some(url.as_str()));
}

#[tokio::test]
async fn test_simple_atom_feed() {
    let server = serve(SIMPLE_ATOM, "application/atom+xml").await;
    let url = format!("{}/subject.xml", server.uri());
    let (request, collected) = collecting_request(&url);

    let summary = fetch_feed(&ReqwestFetcher::new(), request).await.unwrap();

    assert_eq!(summary.url, "https://example.com/feed.xml");
    assert_eq!(summary.title.as_deref(), Some("Mock Feed"));
    assert_eq!(summary.entry_count, 2);

    let info = collected.info.lock().unwrap();
    assert_eq!(info[0].format, FeedFormat::Atom);
    assert_eq!(info[0].author.as_deref(), Some("Mock Author"));
    assert_eq!(info[0].description.as_deref(), Some("A feed served for testing"));

    let entries = collected.entries.lock().unwrap();
    assert_eq!(entries[0].guid.as_deref(), Some("https://example.com/items/1"));
    assert_eq!(entries[1].summary.as_deref(), Some("Mock item <em>two</em>"));
    assert_eq!(entries[1].categories, vec!["mock"]);
}

#[tokio::test]
async fn test_simple_atom_feed_without_self_link() {
    let server = serve(SIMPLE_ATOM_NO_SELF_LINK, "application/atom+xml").await;
    let url = format!("{}/subject.xml", server.uri());
    let (request, collected) = collecting_request(&url);

    let summary = fetch_feed(&ReqwestFetcher::new(), request).await.unwrap();

    assert_eq!(summary.url, url);
    assert_eq!(summary.entry_count, 2);
    let info = collected.info.lock().unwrap();
    assert_eq!(info[0].xml_url.as_deref(), Some(url.as_str()));
}

#[tokio::test]
async fn test_summary_serializes_to_json() {
    let server = serve(SIMPLE_RSS, "application/rss+xml").await;
    let url = format!("{}/subject.xml", server.uri());

    let summary = fetch_feed(&ReqwestFetcher::new(), FetchRequest::new(url))
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&summary).unwrap(),
        serde_json::json!({
            "url": "https://example.com/feed.xml",
            "title": "Mock Feed",
            "entry_count": 2
        })
    );
}

fn large_rss_feed(items: usize) -> String {
    let mut document = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Large Feed</title>
    <link>https://example.com/</link>
"#,
    );
    for n in 1..=items {
        document.push_str(&format!(
            r#"    <item>
      <title>Item {n}</title>
      <guid>https://example.com/items/{n}</guid>
      <description>Description of item {n} &amp; some padding text</description>
      <content:encoded><![CDATA[<p>{}</p>]]></content:encoded>
    </item>
"#,
            "Body text for a long entry. ".repeat(8)
        ));
    }
    document.push_str("  </channel>\n</rss>\n");
    document
}

#[tokio::test]
async fn test_large_feed_streams_every_entry_in_order() {
    let document = large_rss_feed(600);
    assert!(document.len() > 128 * 1024);
    let server = serve(&document, "application/rss+xml").await;
    let url = format!("{}/subject.xml", server.uri());
    let (request, collected) = collecting_request(&url);

    let summary = fetch_feed(&ReqwestFetcher::new(), request).await.unwrap();

    assert_eq!(summary.title.as_deref(), Some("Large Feed"));
    assert_eq!(summary.entry_count, 600);

    let entries = collected.entries.lock().unwrap();
    let titles: Vec<String> = entries.iter().map(|e| e.title.clone().unwrap()).collect();
    let expected: Vec<String> = (1..=600).map(|n| format!("Item {n}")).collect();
    assert_eq!(titles, expected);
    assert_eq!(
        entries[599].summary.as_deref(),
        Some("Description of item 600 & some padding text")
    );
    assert!(
        entries
            .iter()
            .all(|e| e.content.as_deref().is_some_and(|c| c.starts_with("<p>Body text")))
    );
}

// ============================================================================
// Transport behavior
// ============================================================================

#[tokio::test]
async fn test_redirect_resolves_to_final_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old.xml"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("Location", format!("{}/subject.xml", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/subject.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(SIMPLE_RSS_NO_SELF_LINK.as_bytes().to_vec(), "application/rss+xml"),
        )
        .mount(&server)
        .await;

    let summary = fetch_feed(
        &ReqwestFetcher::new(),
        FetchRequest::new(format!("{}/old.xml", server.uri())),
    )
    .await
    .unwrap();

    assert_eq!(summary.url, format!("{}/subject.xml", server.uri()));
}

#[tokio::test]
async fn test_request_options_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/subject.xml"))
        .and(header("X-Feed-Token", "secret"))
        .and(header("User-Agent", "feedpull-tests"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(SIMPLE_RSS.as_bytes().to_vec(), "application/rss+xml"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let options = RequestOptions::default()
        .with_header("X-Feed-Token", "secret")
        .with_user_agent("feedpull-tests");

    let summary = fetch_feed(
        &ReqwestFetcher::new(),
        FetchRequest::new(format!("{}/subject.xml", server.uri())).with_options(options),
    )
    .await
    .unwrap();

    assert_eq!(summary.entry_count, 2);
}

#[tokio::test]
async fn test_http_error_status_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let entries_seen = Arc::new(Mutex::new(0usize));
    let counter = entries_seen.clone();
    let error = fetch_feed(
        &ReqwestFetcher::new(),
        FetchRequest::new(format!("{}/missing.xml", server.uri())).on_entry(move |_| {
            *counter.lock().unwrap() += 1;
            async { Ok(()) }
        }),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        error.as_transport(),
        Some(TransportError::HttpStatus { status: 404, .. })
    ));
    assert_eq!(*entries_seen.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_connection_failure_is_a_transport_error() {
    // Nothing listens on port 1
    let error = fetch_feed(
        &ReqwestFetcher::new(),
        FetchRequest::new("http://127.0.0.1:1/feed.xml"),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        error.as_transport(),
        Some(TransportError::Request { url, .. }) if url == "http://127.0.0.1:1/feed.xml"
    ));
}

#[tokio::test]
async fn test_timeout_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(SIMPLE_RSS.as_bytes().to_vec(), "application/rss+xml")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let error = fetch_feed(
        &ReqwestFetcher::new(),
        FetchRequest::new(format!("{}/slow.xml", server.uri()))
            .with_options(RequestOptions::default().with_timeout(Duration::from_millis(200))),
    )
    .await
    .unwrap_err();

    assert!(matches!(error.as_transport(), Some(TransportError::Request { .. })));
}

// ============================================================================
// Decode failures
// ============================================================================

#[tokio::test]
async fn test_html_page_is_not_a_feed() {
    let server = serve("<!DOCTYPE html><html><body>Nope</body></html>", "text/html").await;

    let error = fetch_feed(
        &ReqwestFetcher::new(),
        FetchRequest::new(format!("{}/subject.xml", server.uri())),
    )
    .await
    .unwrap_err();

    assert_eq!(error.to_string(), "Not a feed");
}

#[tokio::test]
async fn test_handler_error_surfaces_unmodified() {
    let server = serve(SIMPLE_RSS, "application/rss+xml").await;

    let error = fetch_feed(
        &ReqwestFetcher::new(),
        FetchRequest::new(format!("{}/subject.xml", server.uri())).on_entry(|entry| async move {
            if entry.title.as_deref() == Some("Mock Item 1") {
                anyhow::bail!("could not store {}", entry.title.unwrap_or_default());
            }
            Ok(())
        }),
    )
    .await
    .unwrap_err();

    assert_eq!(error.to_string(), "could not store Mock Item 1");
}
