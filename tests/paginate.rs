use std::collections::VecDeque;
use std::sync::Mutex;

use assert_matches::assert_matches;
use serde::Deserialize;

use dili_cellpaint::error::DiliError;
use dili_cellpaint::http::{HttpGet, HttpReply};
use dili_cellpaint::paginate::Paginator;

#[derive(Default)]
struct ScriptedHttp {
    replies: Mutex<VecDeque<Result<HttpReply, DiliError>>>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedHttp {
    fn with(replies: Vec<Result<HttpReply, DiliError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            urls: Mutex::new(Vec::new()),
        }
    }

    fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl HttpGet for ScriptedHttp {
    fn get(&self, url: &str) -> Result<HttpReply, DiliError> {
        self.urls.lock().unwrap().push(url.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected request to {url}"))
    }
}

#[derive(Debug, Deserialize, PartialEq)]
struct Item {
    id: u32,
}

fn page(ids: &[u32], next: Option<&str>) -> Result<HttpReply, DiliError> {
    let items = ids
        .iter()
        .map(|id| serde_json::json!({ "id": id }))
        .collect::<Vec<_>>();
    let body = serde_json::json!({
        "items": items,
        "page_meta": { "next": next },
    });
    Ok(HttpReply {
        status: 200,
        body: serde_json::to_vec(&body).unwrap(),
    })
}

fn status(code: u16) -> Result<HttpReply, DiliError> {
    Ok(HttpReply {
        status: code,
        body: b"unavailable".to_vec(),
    })
}

fn ids(items: &[Item]) -> Vec<u32> {
    items.iter().map(|item| item.id).collect()
}

#[test]
fn pages_are_concatenated_in_order() {
    let http = ScriptedHttp::with(vec![
        page(&[1, 2], Some("/next")),
        page(&[3, 4], Some("/next")),
        page(&[5], None),
    ]);
    let paginator = Paginator::with_page_size(&http, 2);

    let outcome = paginator
        .fetch_all::<Item>("https://api.test/items?q=x", "items", "items")
        .unwrap();

    assert_eq!(ids(&outcome.items), vec![1, 2, 3, 4, 5]);
    assert_eq!(outcome.pages, 3);
    assert!(!outcome.interrupted);
    assert_eq!(
        http.urls(),
        vec![
            "https://api.test/items?q=x&offset=0&limit=2",
            "https://api.test/items?q=x&offset=2&limit=2",
            "https://api.test/items?q=x&offset=4&limit=2",
        ]
    );
}

#[test]
fn empty_next_and_missing_page_meta_end_collection() {
    let http = ScriptedHttp::with(vec![page(&[1], Some(""))]);
    let outcome = Paginator::new(&http)
        .fetch_all::<Item>("https://api.test/items", "items", "items")
        .unwrap();
    assert_eq!(ids(&outcome.items), vec![1]);

    let http = ScriptedHttp::with(vec![Ok(HttpReply {
        status: 200,
        body: br#"{"items": [{"id": 9}]}"#.to_vec(),
    })]);
    let outcome = Paginator::new(&http)
        .fetch_all::<Item>("https://api.test/items", "items", "items")
        .unwrap();
    assert_eq!(ids(&outcome.items), vec![9]);
    assert_eq!(http.urls().len(), 1);
}

#[test]
fn failure_mid_sequence_keeps_earlier_pages() {
    let http = ScriptedHttp::with(vec![
        page(&[1, 2], Some("/next")),
        page(&[3, 4], Some("/next")),
        status(503),
    ]);
    let outcome = Paginator::with_page_size(&http, 2)
        .fetch_all::<Item>("https://api.test/items", "items", "items")
        .unwrap();

    assert_eq!(ids(&outcome.items), vec![1, 2, 3, 4]);
    assert_eq!(outcome.pages, 2);
    assert!(outcome.interrupted);
}

#[test]
fn failure_on_first_page_yields_nothing_without_error() {
    let http = ScriptedHttp::with(vec![status(500)]);
    let outcome = Paginator::new(&http)
        .fetch_all::<Item>("https://api.test/items", "items", "items")
        .unwrap();
    assert!(outcome.items.is_empty());
    assert!(outcome.interrupted);

    let http = ScriptedHttp::with(vec![Err(DiliError::ChemblHttp(
        "connection reset".to_string(),
    ))]);
    let outcome = Paginator::new(&http)
        .fetch_all::<Item>("https://api.test/items", "items", "items")
        .unwrap();
    assert!(outcome.items.is_empty());
    assert!(outcome.interrupted);
}

#[test]
fn malformed_page_is_a_schema_error() {
    let http = ScriptedHttp::with(vec![Ok(HttpReply {
        status: 200,
        body: br#"{"results": []}"#.to_vec(),
    })]);
    let result =
        Paginator::new(&http).fetch_all::<Item>("https://api.test/items", "items", "items");
    assert_matches!(result, Err(DiliError::Schema { .. }));

    let http = ScriptedHttp::with(vec![Ok(HttpReply {
        status: 200,
        body: br#"{"items": [{"name": "no id"}], "page_meta": {"next": null}}"#.to_vec(),
    })]);
    let result =
        Paginator::new(&http).fetch_all::<Item>("https://api.test/items", "items", "items");
    assert_matches!(result, Err(DiliError::Schema { .. }));
}
