//! Walkthrough of the core surface: files, versions, locks, trash and
//! crash recovery against an in-memory blob store.

use std::sync::Arc;

use keepfs::store::MemoryBlobStore;
use keepfs::{LockType, OpenMode, VfsConfig, VirtualFileSystem};

#[tokio::main]
async fn main() -> keepfs::Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(MemoryBlobStore::new());
    let fs = VirtualFileSystem::new(store.clone(), VfsConfig::default());

    fs.create_dir("/notes").await?;
    fs.write_all("/notes/todo.txt", b"- learn the api\n").await?;
    fs.write_all("/notes/todo.txt", b"- learn the api\n- ship it\n").await?;

    println!("content: {:?}", String::from_utf8_lossy(&fs.read_all("/notes/todo.txt").await?));
    for version in fs.versions("/notes/todo.txt").await? {
        println!("version {} ({} bytes)", version.version_id, version.size);
    }

    let handle = fs.open("/notes/todo.txt", OpenMode::ReadWrite).await?;
    fs.try_lock(&handle, LockType::Exclusive).await?;
    println!("delete while locked: {:?}", fs.delete("/notes/todo.txt").await.unwrap_err());
    fs.close(&handle).await?;

    let trash_id = fs.move_to_trash("/notes/todo.txt").await?;
    println!("trashed as {trash_id}");
    fs.restore_from_trash(&trash_id, None).await?;

    // Persist and "crash": a second filesystem over the same store
    // recovers everything.
    fs.flush().await?;
    let revived = VirtualFileSystem::new(store, VfsConfig::default());
    let report = revived.load().await?;
    println!("recovery warnings: {:?}", report.recovery_warnings);
    println!(
        "after restart: {:?}",
        String::from_utf8_lossy(&revived.read_all("/notes/todo.txt").await?)
    );
    Ok(())
}
