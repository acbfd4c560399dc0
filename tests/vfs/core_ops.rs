use keepfs::node::{NodeType, Permissions};
use keepfs::{ErrorKind, VfsConfig};

use super::common::Fixture;

#[tokio::test]
async fn write_read_round_trip_at_offsets() {
    let fx = Fixture::new();
    fx.fs.create_file("/f").await.unwrap();
    fx.fs.write_at("/f", 0, b"hello world").await.unwrap();
    assert_eq!(fx.fs.read_at("/f", 6, 5).await.unwrap(), b"world");
    fx.fs.write_at("/f", 6, b"there").await.unwrap();
    assert_eq!(fx.fs.read_all("/f").await.unwrap(), b"hello there");
}

#[tokio::test]
async fn sparse_reads_are_zero_filled() {
    let fx = Fixture::new();
    fx.fs.create_file("/sparse").await.unwrap();
    fx.fs.write_at("/sparse", 100_000, b"tail").await.unwrap();
    let stat = fx.fs.stat("/sparse").await.unwrap();
    assert_eq!(stat.size, 100_004);
    let hole = fx.fs.read_at("/sparse", 50_000, 16).await.unwrap();
    assert_eq!(hole, vec![0u8; 16]);
    assert_eq!(fx.fs.read_at("/sparse", 100_000, 10).await.unwrap(), b"tail");
}

#[tokio::test]
async fn paths_normalize_before_use() {
    let fx = Fixture::new();
    fx.fs.create_dir("/a").await.unwrap();
    fx.fs.write_all("//a///b.txt", b"x").await.unwrap();
    assert_eq!(fx.fs.read_all("/a/./b.txt").await.unwrap(), b"x");
    assert_eq!(fx.fs.read_all("/a/../a/b.txt").await.unwrap(), b"x");
    let err = fx.fs.create_file("relative").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPath);
}

#[tokio::test]
async fn readdir_preserves_creation_order() {
    let fx = Fixture::new();
    fx.fs.create_dir("/d").await.unwrap();
    for name in ["zeta", "alpha", "mid"] {
        fx.fs.create_file(&format!("/d/{name}")).await.unwrap();
    }
    let names: Vec<String> =
        fx.fs.read_dir("/d").await.unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, ["zeta", "alpha", "mid"]);
}

#[tokio::test]
async fn delete_requires_empty_directory() {
    let fx = Fixture::new();
    fx.fs.create_dir("/d").await.unwrap();
    fx.fs.create_file("/d/f").await.unwrap();
    assert_eq!(fx.fs.delete("/d").await.unwrap_err().kind(), ErrorKind::PermissionDenied);
    fx.fs.delete_recursive("/d").await.unwrap();
    assert!(!fx.fs.exists("/d").await.unwrap());
}

#[tokio::test]
async fn symlink_chains_and_lstat() {
    let fx = Fixture::new();
    fx.fs.create_dir("/d").await.unwrap();
    fx.fs.write_all("/d/real", b"data").await.unwrap();
    fx.fs.create_symlink("/d/link", "real").await.unwrap();
    fx.fs.create_symlink("/top", "/d/link").await.unwrap();

    assert_eq!(fx.fs.read_all("/top").await.unwrap(), b"data");
    let stat = fx.fs.stat("/top").await.unwrap();
    assert_eq!(stat.node_type, NodeType::File);
    assert_eq!(stat.size, 4);

    let lstat = fx.fs.lstat("/top").await.unwrap();
    assert_eq!(lstat.node_type, NodeType::Symlink);
    assert_eq!(lstat.target.as_deref(), Some("/d/link"));
    assert_eq!(fx.fs.read_link("/top").await.unwrap(), "/d/link");
}

#[tokio::test]
async fn symlink_cycles_resolve_to_not_found() {
    let fx = Fixture::new();
    fx.fs.create_symlink("/a", "/b").await.unwrap();
    fx.fs.create_symlink("/b", "/a").await.unwrap();
    assert_eq!(fx.fs.stat("/a").await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn xattr_set_get_list_remove() {
    let fx = Fixture::new();
    fx.fs.create_file("/f").await.unwrap();
    fx.fs.set_xattr("/f", "k", b"v1").await.unwrap();
    fx.fs.set_xattr("/f", "k", b"v2").await.unwrap();
    assert_eq!(fx.fs.get_xattr("/f", "k").await.unwrap(), b"v2");
    assert_eq!(fx.fs.list_xattrs("/f").await.unwrap(), vec!["k".to_string()]);
    fx.fs.remove_xattr("/f", "k").await.unwrap();
    assert_eq!(fx.fs.get_xattr("/f", "k").await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn quota_blocks_growth_without_mutating() {
    let mut config = VfsConfig::default();
    config.quota_bytes = 100;
    let fx = Fixture::with_config(config);

    fx.fs.write_all("/f", &[1u8; 80]).await.unwrap();
    let err = fx.fs.write_at("/f", 60, &[2u8; 60]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    // Nothing changed.
    assert_eq!(fx.fs.read_all("/f").await.unwrap(), vec![1u8; 80]);

    // Staying inside the quota still works.
    fx.fs.write_at("/f", 80, &[3u8; 20]).await.unwrap();
    assert_eq!(fx.fs.stat("/f").await.unwrap().size, 100);
}

#[tokio::test]
async fn permissions_deny_reads_and_writes() {
    let fx = Fixture::new();
    fx.fs.write_all("/f", b"secret").await.unwrap();
    fx.fs
        .set_permissions("/f", Permissions { read: false, write: false, execute: false })
        .await
        .unwrap();
    assert_eq!(fx.fs.read_all("/f").await.unwrap_err().kind(), ErrorKind::PermissionDenied);
    assert_eq!(
        fx.fs.write_at("/f", 0, b"x").await.unwrap_err().kind(),
        ErrorKind::PermissionDenied
    );
}

#[tokio::test]
async fn append_and_truncate() {
    let fx = Fixture::new();
    fx.fs.append("/log", b"one\n").await.unwrap();
    fx.fs.append("/log", b"two\n").await.unwrap();
    assert_eq!(fx.fs.read_all("/log").await.unwrap(), b"one\ntwo\n");
    fx.fs.truncate("/log", 4).await.unwrap();
    assert_eq!(fx.fs.read_all("/log").await.unwrap(), b"one\n");
}

#[tokio::test]
async fn copy_and_move_subtrees() {
    let fx = Fixture::new();
    fx.fs.create_dir_recursive("/src/sub").await.unwrap();
    fx.fs.write_all("/src/sub/f", b"payload").await.unwrap();
    fx.fs.set_xattr("/src/sub/f", "k", b"v").await.unwrap();

    fx.fs.copy_path("/src", "/copy").await.unwrap();
    assert_eq!(fx.fs.read_all("/copy/sub/f").await.unwrap(), b"payload");
    assert_eq!(fx.fs.get_xattr("/copy/sub/f", "k").await.unwrap(), b"v");
    assert!(fx.fs.exists("/src/sub/f").await.unwrap());

    fx.fs.move_path("/src", "/moved").await.unwrap();
    assert!(!fx.fs.exists("/src").await.unwrap());
    assert_eq!(fx.fs.read_all("/moved/sub/f").await.unwrap(), b"payload");
}

#[tokio::test]
async fn find_matches_without_descending_into_mounts() {
    let fx = Fixture::new();
    fx.fs.create_dir("/data").await.unwrap();
    fx.fs.write_all("/data/a.txt", b"x").await.unwrap();
    fx.fs.write_all("/data/b.log", b"y").await.unwrap();

    let adapter = super::common::MemoryDiskAdapter::new("/backing");
    fx.fs.mount("/m", adapter, false).await.unwrap();
    fx.fs.write_all("/m/c.txt", b"z").await.unwrap();

    let found = fx
        .fs
        .find("/", 10, |path, stat| {
            stat.node_type == NodeType::File && path.ends_with(".txt")
        })
        .await
        .unwrap();
    let paths: Vec<&str> = found.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(paths, ["/data/a.txt"]);
}

#[tokio::test]
async fn metrics_track_operations_and_bytes() {
    use keepfs::metrics::OpKind;
    let fx = Fixture::new();
    fx.fs.write_all("/f", b"12345").await.unwrap();
    let _ = fx.fs.read_all("/f").await.unwrap();
    let _ = fx.fs.read_all("/missing").await.unwrap_err();

    let snapshot = fx.fs.metrics();
    let reads = snapshot.op(OpKind::Read);
    assert_eq!(reads.count, 2);
    assert_eq!(reads.success, 1);
    assert_eq!(reads.failure, 1);
    assert_eq!(snapshot.total_bytes_written, 5);
    assert_eq!(snapshot.total_bytes_read, 5);
}
