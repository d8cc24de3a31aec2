// Abandoned uploads must never surface under their final key.

use bytes::Bytes;
use dokhub_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;

#[tokio::test]
async fn test_dropped_upload_is_not_visible() {
    let dir = tempfile::tempdir().unwrap();
    let store = FilesystemBackend::new(dir.path()).await.unwrap();
    let key = "uploads/u/1_abcdef12_big.zip";

    {
        let mut upload = store.put_stream(key, Some("application/zip")).await.unwrap();
        upload.write(Bytes::from(vec![7u8; 4096])).await.unwrap();
        // dropped without finish or abort
    }

    assert!(!store.exists(key).await.unwrap());
    assert!(store.list("uploads").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_task_leaves_no_object() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
    let key = "uploads/u/2_abcdef12_slow.bin";

    let writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut upload = store.put_stream(key, None).await.unwrap();
            loop {
                upload.write(Bytes::from_static(&[1u8; 1024])).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    writer.abort();
    let _ = writer.await;

    assert!(!store.exists(key).await.unwrap());
}

#[tokio::test]
async fn test_abort_then_retry_same_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = FilesystemBackend::new(dir.path()).await.unwrap();
    let key = "uploads/u/3_abcdef12_retry.pdf";

    let mut first = store.put_stream(key, None).await.unwrap();
    first.write(Bytes::from_static(b"broken")).await.unwrap();
    first.abort().await.unwrap();

    let mut second = store.put_stream(key, None).await.unwrap();
    second.write(Bytes::from_static(b"%PDF-1.7")).await.unwrap();
    assert_eq!(second.finish().await.unwrap(), 8);

    assert_eq!(store.get(key).await.unwrap(), Bytes::from_static(b"%PDF-1.7"));
    assert_eq!(store.list("uploads/u").await.unwrap(), vec![key.to_string()]);
}
