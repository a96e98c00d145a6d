//! Integration tests for the filesystem store.

use std::time::Duration;

use bytes::Bytes;
use cachet_core::{read_to_end, reader_from_bytes, CacheKey, CacheMeta, CacheStore};
use cachet_fs::FsStore;
use chrono::Utc;
use tempfile::tempdir;

const KEY_A: &str = "abcd1234abcd1234abcd1234abcd1234abcd1234abcd1234abcd1234abcd1234";
const KEY_B: &str = "ffff0000ffff0000ffff0000ffff0000ffff0000ffff0000ffff0000ffff0000";

fn key(hex: &str) -> CacheKey {
    CacheKey::from_hex(hex).unwrap()
}

fn meta(ttl_secs: u64) -> CacheMeta {
    let ttl = (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs));
    let mut meta = CacheMeta::new("text/html", 200, ttl);
    meta.etag = "\"abc\"".to_string();
    meta.headers
        .insert("Vary".to_string(), "Accept-Encoding".to_string());
    meta
}

async fn put_bytes(store: &FsStore, key: &CacheKey, body: &[u8], meta: CacheMeta) {
    store
        .put(key, reader_from_bytes(Bytes::copy_from_slice(body)), meta)
        .await
        .unwrap();
}

#[tokio::test]
async fn put_then_get_round_trips() {
    let dir = tempdir().unwrap();
    let store = FsStore::new(dir.path(), 2).await.unwrap();
    let key = key(KEY_A);

    put_bytes(&store, &key, b"<html>hello</html>", meta(3600)).await;

    let (reader, stored) = store.get(&key).await.unwrap().expect("entry present");
    let body = read_to_end(reader).await.unwrap();
    assert_eq!(body, b"<html>hello</html>");
    assert_eq!(stored.content_type, "text/html");
    assert_eq!(stored.status_code, 200);
    assert_eq!(stored.etag, "\"abc\"");
    assert_eq!(stored.size, body.len() as u64);
    assert_eq!(
        stored.headers.get("Vary").map(String::as_str),
        Some("Accept-Encoding")
    );
}

#[tokio::test]
async fn entries_shard_into_two_character_directories() {
    let dir = tempdir().unwrap();
    let store = FsStore::new(dir.path(), 2).await.unwrap();
    let key = key(KEY_A);

    put_bytes(&store, &key, b"body", meta(3600)).await;

    let expected = dir
        .path()
        .join("ab")
        .join("cd")
        .join(format!("{KEY_A}.data"));
    assert!(expected.exists(), "missing {}", expected.display());
    assert!(expected.with_extension("meta").exists());
}

#[tokio::test]
async fn depth_zero_disables_sharding() {
    let dir = tempdir().unwrap();
    let store = FsStore::new(dir.path(), 0).await.unwrap();
    let key = key(KEY_A);

    put_bytes(&store, &key, b"body", meta(3600)).await;

    assert!(dir.path().join(format!("{KEY_A}.data")).exists());
}

#[tokio::test]
async fn out_of_range_depth_falls_back_to_default() {
    let dir = tempdir().unwrap();
    let store = FsStore::new(dir.path(), 9).await.unwrap();
    let key = key(KEY_A);

    put_bytes(&store, &key, b"body", meta(3600)).await;

    assert!(dir
        .path()
        .join("ab")
        .join("cd")
        .join(format!("{KEY_A}.data"))
        .exists());
}

#[tokio::test]
async fn expired_entries_are_not_found_and_are_cleaned_up() {
    let dir = tempdir().unwrap();
    let store = FsStore::new(dir.path(), 2).await.unwrap();
    let key = key(KEY_A);

    let mut stale = meta(1);
    stale.cached_at = Utc::now() - chrono::Duration::seconds(10);
    put_bytes(&store, &key, b"old", stale).await;

    assert!(store.get(&key).await.unwrap().is_none());
    // A second lookup still reports not-found.
    assert!(store.get(&key).await.unwrap().is_none());
    assert!(!dir
        .path()
        .join("ab")
        .join("cd")
        .join(format!("{KEY_A}.data"))
        .exists());
}

#[tokio::test]
async fn zero_ttl_never_expires() {
    let dir = tempdir().unwrap();
    let store = FsStore::new(dir.path(), 2).await.unwrap();
    let key = key(KEY_A);

    let mut eternal = meta(0);
    eternal.cached_at = Utc::now() - chrono::Duration::days(365);
    put_bytes(&store, &key, b"old but fresh", eternal).await;

    assert!(store.get(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn delete_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = FsStore::new(dir.path(), 2).await.unwrap();
    let key = key(KEY_A);

    put_bytes(&store, &key, b"body", meta(3600)).await;

    store.delete(&key).await.unwrap();
    store.delete(&key).await.unwrap();
    assert!(store.get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn overwrite_keeps_the_last_writer() {
    let dir = tempdir().unwrap();
    let store = FsStore::new(dir.path(), 2).await.unwrap();
    let key = key(KEY_A);

    put_bytes(&store, &key, b"first", meta(3600)).await;
    put_bytes(&store, &key, b"second", meta(3600)).await;

    let (reader, stored) = store.get(&key).await.unwrap().unwrap();
    assert_eq!(read_to_end(reader).await.unwrap(), b"second");
    assert_eq!(stored.size, 6);
}

#[tokio::test]
async fn purge_prefix_matches_recovered_keys() {
    let dir = tempdir().unwrap();
    let store = FsStore::new(dir.path(), 2).await.unwrap();
    let key_a = key(KEY_A);
    let key_b = key(KEY_B);

    put_bytes(&store, &key_a, b"a", meta(3600)).await;
    put_bytes(&store, &key_b, b"b", meta(3600)).await;

    store.purge_prefix("abcd1234").await.unwrap();

    assert!(store.get(&key_a).await.unwrap().is_none());
    assert!(store.get(&key_b).await.unwrap().is_some());
}

#[tokio::test]
async fn purge_prefix_ignores_url_like_prefixes() {
    let dir = tempdir().unwrap();
    let store = FsStore::new(dir.path(), 2).await.unwrap();
    let key_a = key(KEY_A);

    put_bytes(&store, &key_a, b"a", meta(3600)).await;

    store.purge_prefix("/static/").await.unwrap();
    assert!(store.get(&key_a).await.unwrap().is_some());
}

#[tokio::test]
async fn successful_writes_leave_no_temp_files() {
    let dir = tempdir().unwrap();
    let store = FsStore::new(dir.path(), 2).await.unwrap();
    put_bytes(&store, &key(KEY_A), b"body", meta(3600)).await;

    let mut pending = vec![dir.path().to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current).unwrap() {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_dir() {
                pending.push(entry.path());
            } else {
                let name = entry.file_name();
                assert!(
                    !name.to_string_lossy().ends_with(".tmp"),
                    "leftover temp file {:?}",
                    name
                );
            }
        }
    }
}

#[tokio::test]
async fn meta_file_is_json() {
    let dir = tempdir().unwrap();
    let store = FsStore::new(dir.path(), 2).await.unwrap();
    put_bytes(&store, &key(KEY_A), b"body", meta(3600)).await;

    let raw = std::fs::read(
        dir.path()
            .join("ab")
            .join("cd")
            .join(format!("{KEY_A}.meta")),
    )
    .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(value["content_type"], "text/html");
    assert_eq!(value["size"], 4);
    assert_eq!(value["ttl"], 3600);
}
