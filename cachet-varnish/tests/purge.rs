//! Integration tests driving the HTTP-purge store against stub
//! endpoints.

use std::sync::{Arc, Mutex};

use cachet_core::{CacheKey, CacheStore};
use cachet_varnish::VarnishStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const KEY: &str = "abcd1234abcd1234abcd1234abcd1234abcd1234abcd1234abcd1234abcd1234";

/// Spawns a stub HTTP endpoint answering every request with the given
/// status line, recording request heads.
async fn spawn_endpoint(status_line: &'static str) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let record = Arc::clone(&record);
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(read) => {
                            head.extend_from_slice(&chunk[..read]);
                            if head.windows(4).any(|window| window == b"\r\n\r\n") {
                                break;
                            }
                        }
                    }
                }
                record
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&head).into_owned());
                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });

    (format!("http://{addr}"), seen)
}

#[tokio::test]
async fn delete_purges_every_endpoint() {
    let (endpoint_a, seen_a) = spawn_endpoint("200 OK").await;
    let (endpoint_b, seen_b) = spawn_endpoint("204 No Content").await;
    let store = VarnishStore::new([endpoint_a, endpoint_b]).unwrap();

    let key = CacheKey::from_hex(KEY).unwrap();
    store.delete(&key).await.unwrap();

    for seen in [seen_a, seen_b] {
        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(
            requests[0].starts_with(&format!("PURGE /{KEY} HTTP/1.1")),
            "unexpected request: {}",
            requests[0]
        );
    }
}

#[tokio::test]
async fn purge_prefix_sends_a_ban_with_the_url_header() {
    let (endpoint, seen) = spawn_endpoint("200 OK").await;
    let store = VarnishStore::new([endpoint]).unwrap();

    store.purge_prefix("/static/").await.unwrap();

    let requests = seen.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("BAN / HTTP/1.1"));
    assert!(
        requests[0].to_lowercase().contains("x-ban-url: ^/static/.*"),
        "unexpected request: {}",
        requests[0]
    );
}

#[tokio::test]
async fn ban_sends_the_expression_header() {
    let (endpoint, seen) = spawn_endpoint("200 OK").await;
    let store = VarnishStore::new([endpoint]).unwrap();

    store.ban("obj.http.content-type ~ text/html").await.unwrap();

    let requests = seen.lock().unwrap();
    assert!(requests[0]
        .to_lowercase()
        .contains("x-ban-expression: obj.http.content-type ~ text/html"));
}

#[tokio::test]
async fn unexpected_status_fails_the_operation() {
    let (endpoint, _seen) = spawn_endpoint("405 Method Not Allowed").await;
    let store = VarnishStore::new([endpoint]).unwrap();

    let key = CacheKey::from_hex(KEY).unwrap();
    assert!(store.delete(&key).await.is_err());
}

#[tokio::test]
async fn get_always_misses_and_put_is_accepted() {
    let (endpoint, seen) = spawn_endpoint("200 OK").await;
    let store = VarnishStore::new([endpoint]).unwrap();
    let key = CacheKey::from_hex(KEY).unwrap();

    assert!(store.get(&key).await.unwrap().is_none());
    store
        .put(
            &key,
            cachet_core::empty_reader(),
            cachet_core::CacheMeta::new("text/html", 200, None),
        )
        .await
        .unwrap();

    // Neither operation talks to the fleet.
    assert!(seen.lock().unwrap().is_empty());
}
