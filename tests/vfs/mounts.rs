use std::sync::Arc;

use keepfs::adapter::LocalDiskAdapter;
use keepfs::ErrorKind;

use super::common::{Fixture, MemoryDiskAdapter};

#[tokio::test]
async fn nested_mounts_route_by_longest_prefix() {
    let fx = Fixture::new();
    let outer = MemoryDiskAdapter::new("/disk/outer");
    let inner = MemoryDiskAdapter::new("/disk/inner");
    fx.fs.mount("/m1", outer.clone(), false).await.unwrap();
    fx.fs.mount("/m1/inner", inner.clone(), false).await.unwrap();

    fx.fs.write_all("/m1/inner/x", b"deep").await.unwrap();
    fx.fs.write_all("/m1/y", b"shallow").await.unwrap();

    assert!(inner.calls().iter().any(|call| call.starts_with("write_file /x")));
    assert!(!outer.calls().iter().any(|call| call.contains("/inner/x")));
    assert!(outer.calls().iter().any(|call| call.starts_with("write_file /y")));

    assert_eq!(fx.fs.read_all("/m1/inner/x").await.unwrap(), b"deep");
    assert_eq!(fx.fs.read_all("/m1/y").await.unwrap(), b"shallow");
}

#[tokio::test]
async fn mount_point_appears_in_parent_listing() {
    let fx = Fixture::new();
    let adapter = MemoryDiskAdapter::new("/disk");
    fx.fs.create_dir("/data").await.unwrap();
    fx.fs.mount("/data/mnt", adapter, false).await.unwrap();

    let names: Vec<String> =
        fx.fs.read_dir("/data").await.unwrap().into_iter().map(|e| e.name).collect();
    assert!(names.contains(&"mnt".to_string()));
}

#[tokio::test]
async fn read_only_mount_rejects_writes() {
    let fx = Fixture::new();
    let adapter = MemoryDiskAdapter::new("/disk");
    adapter.plant_file("/existing", b"content").await;
    fx.fs.mount("/ro", adapter, true).await.unwrap();

    assert_eq!(fx.fs.read_all("/ro/existing").await.unwrap(), b"content");
    for err in [
        fx.fs.write_all("/ro/new", b"x").await.unwrap_err(),
        fx.fs.create_file("/ro/new").await.unwrap_err(),
        fx.fs.create_dir("/ro/sub").await.unwrap_err(),
        fx.fs.delete("/ro/existing").await.unwrap_err(),
        fx.fs.move_to_trash("/ro/existing").await.unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }
}

#[tokio::test]
async fn symlinks_inside_mounts_are_rejected() {
    let fx = Fixture::new();
    fx.fs.mount("/m", MemoryDiskAdapter::new("/disk"), false).await.unwrap();
    let err = fx.fs.create_symlink("/m/link", "/target").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn mount_point_cannot_be_deleted_while_mounted() {
    let fx = Fixture::new();
    fx.fs.mount("/m", MemoryDiskAdapter::new("/disk"), false).await.unwrap();
    assert_eq!(fx.fs.delete("/m").await.unwrap_err().kind(), ErrorKind::PermissionDenied);

    fx.fs.unmount("/m").await.unwrap();
    // Unmount leaves the (empty) anchor directory behind.
    assert!(fx.fs.exists("/m").await.unwrap());
    fx.fs.delete("/m").await.unwrap();
}

#[tokio::test]
async fn root_mount_is_rejected() {
    let fx = Fixture::new();
    let err = fx.fs.mount("/", MemoryDiskAdapter::new("/disk"), false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPath);
}

#[tokio::test]
async fn mounts_restore_as_pending_after_reload() {
    let fx = Fixture::new();
    let adapter = MemoryDiskAdapter::new("/disk/a");
    fx.fs.mount("/m", adapter, true).await.unwrap();

    let revived = fx.reload();
    let pending = revived.pending_mounts().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].virtual_path, "/m");
    assert_eq!(pending[0].root_path, "/disk/a");
    assert!(pending[0].read_only);
    assert!(revived.mounts().await.unwrap().is_empty());

    // Supplying an adapter for the pending path claims it.
    let replacement = MemoryDiskAdapter::new("/disk/a");
    revived.mount("/m", replacement, true).await.unwrap();
    assert!(revived.pending_mounts().await.unwrap().is_empty());
    assert_eq!(revived.mounts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unmounted_paths_fall_back_to_memory() {
    let fx = Fixture::new();
    let adapter = MemoryDiskAdapter::new("/disk");
    fx.fs.mount("/m", adapter, false).await.unwrap();
    fx.fs.write_all("/m/on-disk", b"disk").await.unwrap();
    fx.fs.unmount("/m").await.unwrap();

    // After unmount the same path is served by the memory tree, where
    // nothing but the empty anchor exists.
    assert!(!fx.fs.exists("/m/on-disk").await.unwrap());
    assert!(fx.fs.read_dir("/m").await.unwrap().is_empty());
}

#[tokio::test]
async fn mounted_trash_delegates_bytes_to_the_adapter() {
    let fx = Fixture::new();
    let adapter = MemoryDiskAdapter::new("/disk");
    fx.fs.mount("/m", adapter.clone(), false).await.unwrap();
    fx.fs.write_all("/m/doomed", b"bytes").await.unwrap();

    let trash_id = fx.fs.move_to_trash("/m/doomed").await.unwrap();
    assert!(!fx.fs.exists("/m/doomed").await.unwrap());
    let listed = fx.fs.list_trash().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].is_mounted);
    // Metadata only here; content lives in the adapter's trash area.
    assert_eq!(listed[0].bytes, 0);
    assert!(adapter.calls().iter().any(|c| c.starts_with("move_to_trash /doomed")));

    fx.fs.restore_from_trash(&trash_id, None).await.unwrap();
    assert_eq!(fx.fs.read_all("/m/doomed").await.unwrap(), b"bytes");
}

#[tokio::test]
async fn sync_captures_external_changes_as_versions() {
    let fx = Fixture::new();
    let adapter = MemoryDiskAdapter::new("/disk");
    fx.fs.mount("/m", adapter.clone(), false).await.unwrap();
    fx.fs.write_all("/m/watched", b"original").await.unwrap();
    fx.fs.sync("/m").await.unwrap();

    // An external process rewrites the file behind our back.
    adapter.plant_file("/watched", b"changed externally").await;
    let changed = fx.fs.sync("/m").await.unwrap();
    assert_eq!(changed, 1);

    let versions = fx.fs.versions("/m/watched").await.unwrap();
    assert!(!versions.is_empty());
    // The captured version is the post-change content observed at
    // detection time.
    let newest = fx.fs.read_version("/m/watched", &versions[0].version_id).await.unwrap();
    assert_eq!(newest, b"changed externally");

    // Nothing changed since; a second scan is quiet.
    assert_eq!(fx.fs.sync("/m").await.unwrap(), 0);
}

#[tokio::test]
async fn sync_requires_a_mounted_path() {
    let fx = Fixture::new();
    fx.fs.create_dir("/plain").await.unwrap();
    assert_eq!(fx.fs.sync("/plain").await.unwrap_err().kind(), ErrorKind::NotMounted);
}

#[tokio::test]
async fn local_adapter_serves_a_real_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("seed.txt"), b"seeded").unwrap();

    let fx = Fixture::new();
    let adapter = Arc::new(LocalDiskAdapter::new(dir.path()));
    fx.fs.mount("/disk", adapter, false).await.unwrap();

    assert_eq!(fx.fs.read_all("/disk/seed.txt").await.unwrap(), b"seeded");
    fx.fs.write_all("/disk/new.txt", b"through the vfs").await.unwrap();
    assert_eq!(std::fs::read(dir.path().join("new.txt")).unwrap(), b"through the vfs");

    fx.fs.create_dir("/disk/sub").await.unwrap();
    assert!(dir.path().join("sub").is_dir());

    let trash_id = fx.fs.move_to_trash("/disk/new.txt").await.unwrap();
    assert!(!dir.path().join("new.txt").exists());
    fx.fs.restore_from_trash(&trash_id, None).await.unwrap();
    assert!(dir.path().join("new.txt").exists());
}
