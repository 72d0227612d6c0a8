use crate::*;

use std::sync::Arc;

use canopy_core::blob::split_blob;
use canopy_core::{BlockSchema, DataTag};
use canopy_services::{
    add_resource, read_resource, BlockStore, FsBlockStore, MemoryBlockStore, ResourceUpdate,
    RootStatus, UpdateKind,
};

// ══════════════════════════════════════════════════════════════════════════════
//  Downloads from a single peer
// ══════════════════════════════════════════════════════════════════════════════

/// Ten bytes at the smallest block size fit in the root alone.
#[tokio::test]
async fn test_single_block_blob() -> anyhow::Result<()> {
    let remote = MemoryBlockStore::new();
    let root = add_resource(&remote, max(39), DataTag::BlockBody, b"0123456789")?;
    assert_eq!(remote.len(), 1);

    let mut node = Node::in_memory(remote, &config(39, 1024, 30))?;
    node.download(root);

    let update = node.next_update().await?;
    assert_eq!(update.kind, UpdateKind::Added);
    assert_eq!(update.root, root);
    assert_eq!(node.network.total_requests(), 1);
    assert_eq!(node.store.get_status(&root)?, Some(RootStatus::Full));

    let (tag, payload) = read_resource(&*node.store, node.max_block_size, &root)?;
    assert_eq!(tag, DataTag::BlockBody);
    assert_eq!(payload, b"0123456789");

    node.stop().await
}

#[tokio::test]
async fn test_large_blob_round_trip() -> anyhow::Result<()> {
    let payload = random_payload(300_000, 11);
    let remote = MemoryBlockStore::new();
    let root = add_resource(&remote, max(1024), DataTag::BlockBody, &payload)?;
    let schema = BlockSchema::length_prefixed(max(1024), payload.len() + 1);
    assert!(schema.depth() >= 2, "blob should span several levels");

    let mut node = Node::in_memory(remote, &config(1024, 1 << 20, 30))?;
    node.download(root);

    assert_eq!(node.next_update().await?, ResourceUpdate::added(root));
    assert_eq!(node.network.total_requests(), schema.total_blocks());
    let (_, read) = read_resource(&*node.store, node.max_block_size, &root)?;
    assert_eq!(read, payload);

    node.stop().await
}

#[tokio::test]
async fn test_download_into_filesystem_store() -> anyhow::Result<()> {
    let dir = temp_dir("fs-store");
    let payload = random_payload(50_000, 12);
    let remote = MemoryBlockStore::new();
    let root = add_resource(&remote, max(512), DataTag::BlockBody, &payload)?;

    let store = Arc::new(FsBlockStore::new(&dir)?);
    let mut node = Node::spawn(store.clone(), remote, &config(512, 1 << 20, 30))?;
    node.download(root);
    assert_eq!(node.next_update().await?, ResourceUpdate::added(root));
    node.stop().await?;

    // A reopened store still holds the finished download.
    let reopened = FsBlockStore::new(&dir)?;
    assert_eq!(reopened.get_status(&root)?, Some(RootStatus::Full));
    let (_, read) = read_resource(&reopened, max(512), &root)?;
    assert_eq!(read, payload);
    assert_eq!(
        reopened.count(),
        split_blob(max(512), DataTag::BlockBody, &payload)?.blocks.len()
    );

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

/// Asking again for a finished root answers from the store.
#[tokio::test]
async fn test_completed_root_is_reported_again() -> anyhow::Result<()> {
    let payload = random_payload(10_000, 13);
    let remote = MemoryBlockStore::new();
    let root = add_resource(&remote, max(256), DataTag::BlockBody, &payload)?;

    let mut node = Node::in_memory(remote, &config(256, 1 << 20, 30))?;
    node.download(root);
    assert_eq!(node.next_update().await?, ResourceUpdate::added(root));
    let requests = node.network.total_requests();

    node.download(root);
    assert_eq!(node.next_update().await?, ResourceUpdate::added(root));
    assert_eq!(node.network.total_requests(), requests);

    node.stop().await
}

#[tokio::test]
async fn test_concurrent_downloads() -> anyhow::Result<()> {
    let remote = MemoryBlockStore::new();
    let mut roots = Vec::new();
    for seed in 0..8 {
        let payload = random_payload(5_000 + seed as usize * 1_000, 100 + seed);
        roots.push(add_resource(&remote, max(256), DataTag::BlockBody, &payload)?);
    }

    let mut node = Node::in_memory(remote, &config(256, 1 << 20, 30))?;
    for root in &roots {
        node.download(*root);
    }

    let mut added = Vec::new();
    for _ in 0..roots.len() {
        let update = node.next_update().await?;
        assert_eq!(update.kind, UpdateKind::Added);
        added.push(update.root);
    }
    added.sort();
    roots.sort();
    assert_eq!(added, roots);

    node.stop().await
}
