use std::time::Duration;

use keepfs::{ErrorKind, LockType, OpenMode};

use super::common::Fixture;

#[tokio::test]
async fn shared_locks_coexist_and_block_exclusive() {
    let fx = Fixture::new();
    fx.fs.write_all("/f", b"data").await.unwrap();
    let h1 = fx.fs.open("/f", OpenMode::Read).await.unwrap();
    let h2 = fx.fs.open("/f", OpenMode::Read).await.unwrap();

    fx.fs.try_lock(&h1, LockType::Shared).await.unwrap();
    fx.fs.try_lock(&h2, LockType::Shared).await.unwrap();

    let h3 = fx.fs.open("/f", OpenMode::Write).await.unwrap();
    let err = fx.fs.try_lock(&h3, LockType::Exclusive).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Locked);
}

#[tokio::test]
async fn exclusive_blocks_delete_until_close() {
    let fx = Fixture::new();
    fx.fs.write_all("/f", b"data").await.unwrap();
    let h1 = fx.fs.open("/f", OpenMode::ReadWrite).await.unwrap();
    let h2 = fx.fs.open("/f", OpenMode::Read).await.unwrap();

    fx.fs.try_lock(&h1, LockType::Exclusive).await.unwrap();
    assert_eq!(
        fx.fs.try_lock(&h2, LockType::Shared).await.unwrap_err().kind(),
        ErrorKind::Locked
    );
    assert_eq!(fx.fs.delete("/f").await.unwrap_err().kind(), ErrorKind::Locked);
    assert!(fx.fs.is_locked("/f").await.unwrap());

    // Closing releases every lock the handle held.
    fx.fs.close(&h1).await.unwrap();
    fx.fs.try_lock(&h2, LockType::Shared).await.unwrap();
    fx.fs.close(&h2).await.unwrap();
    fx.fs.delete("/f").await.unwrap();
}

#[tokio::test]
async fn upgrade_and_downgrade_for_sole_holder() {
    let fx = Fixture::new();
    fx.fs.write_all("/f", b"data").await.unwrap();
    let h1 = fx.fs.open("/f", OpenMode::ReadWrite).await.unwrap();

    fx.fs.try_lock(&h1, LockType::Shared).await.unwrap();
    fx.fs.try_lock(&h1, LockType::Exclusive).await.unwrap();

    let h2 = fx.fs.open("/f", OpenMode::Read).await.unwrap();
    assert_eq!(
        fx.fs.try_lock(&h2, LockType::Shared).await.unwrap_err().kind(),
        ErrorKind::Locked
    );

    // Downgrade lets the second shared reader in.
    fx.fs.try_lock(&h1, LockType::Shared).await.unwrap();
    fx.fs.try_lock(&h2, LockType::Shared).await.unwrap();
}

#[tokio::test]
async fn blocking_lock_waits_for_release() {
    let fx = Fixture::new();
    fx.fs.write_all("/f", b"data").await.unwrap();
    let h1 = fx.fs.open("/f", OpenMode::Read).await.unwrap();
    let h2 = fx.fs.open("/f", OpenMode::Write).await.unwrap();

    fx.fs.try_lock(&h1, LockType::Shared).await.unwrap();

    let fs = fx.fs.clone();
    let waiter = tokio::spawn(async move {
        fs.lock(&h2, LockType::Exclusive).await.unwrap();
        h2
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());

    // The filesystem stays usable while the waiter parks: the
    // coordinator lock is not held across the suspension.
    fx.fs.write_all("/other", b"concurrent").await.unwrap();

    fx.fs.close(&h1).await.unwrap();
    let h2 = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter wakes after release")
        .unwrap();
    assert!(fx.fs.is_locked("/f").await.unwrap());
    fx.fs.close(&h2).await.unwrap();
    assert!(!fx.fs.is_locked("/f").await.unwrap());
}

#[tokio::test]
async fn handle_writes_respect_other_holders() {
    let fx = Fixture::new();
    fx.fs.write_all("/f", b"data").await.unwrap();
    let h1 = fx.fs.open("/f", OpenMode::ReadWrite).await.unwrap();
    let h2 = fx.fs.open("/f", OpenMode::ReadWrite).await.unwrap();

    fx.fs.try_lock(&h1, LockType::Exclusive).await.unwrap();
    assert_eq!(
        fx.fs.write_with(&h2, 0, b"nope").await.unwrap_err().kind(),
        ErrorKind::Locked
    );
    // The lock holder itself writes fine.
    fx.fs.write_with(&h1, 0, b"yes!").await.unwrap();
    assert_eq!(fx.fs.read_with(&h1, 0, 4).await.unwrap(), b"yes!");
}

#[tokio::test]
async fn closed_handles_are_rejected() {
    let fx = Fixture::new();
    fx.fs.write_all("/f", b"data").await.unwrap();
    let handle = fx.fs.open("/f", OpenMode::Read).await.unwrap();
    fx.fs.close(&handle).await.unwrap();
    assert!(fx.fs.try_lock(&handle, LockType::Shared).await.is_err());
    assert_eq!(fx.fs.open_handle_count().await, 0);
}

#[tokio::test]
async fn open_rejects_directories_and_missing_files() {
    let fx = Fixture::new();
    fx.fs.create_dir("/d").await.unwrap();
    assert_eq!(
        fx.fs.open("/d", OpenMode::Read).await.unwrap_err().kind(),
        ErrorKind::NotFile
    );
    assert_eq!(
        fx.fs.open("/missing", OpenMode::Read).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}
