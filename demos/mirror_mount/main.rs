//! Mounts a real directory into the virtual namespace and mirrors a
//! few operations through it.
//!
//! Usage: mirror_mount <directory>

use std::sync::Arc;

use keepfs::adapter::LocalDiskAdapter;
use keepfs::store::MemoryBlobStore;
use keepfs::{VfsConfig, VirtualFileSystem};

#[tokio::main]
async fn main() -> keepfs::Result<()> {
    tracing_subscriber::fmt::init();

    let root = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("usage: mirror_mount <directory>");
        std::process::exit(2);
    });

    let fs = VirtualFileSystem::new(Arc::new(MemoryBlobStore::new()), VfsConfig::default());
    fs.mount("/mnt/disk", Arc::new(LocalDiskAdapter::new(root)), false).await?;

    fs.write_all("/mnt/disk/hello.txt", b"written through the vfs\n").await?;
    for entry in fs.read_dir("/mnt/disk").await? {
        println!("{:?}\t{}", entry.node_type, entry.name);
    }

    let changed = fs.sync("/mnt/disk").await?;
    println!("sync captured {changed} changed file(s)");

    fs.unmount("/mnt/disk").await?;
    println!("pending after restart would be: {:?}", fs.pending_mounts().await?);
    Ok(())
}
