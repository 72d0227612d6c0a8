use crate::*;

use canopy_core::blob::split_blob;
use canopy_core::DataTag;
use canopy_services::{add_resource, read_resource, MemoryBlockStore};

// ══════════════════════════════════════════════════════════════════════════════
//  Blocks shared between roots
// ══════════════════════════════════════════════════════════════════════════════

/// Two payloads of equal length that differ only in their first byte:
/// only the root blocks differ, every other block is shared.
fn twin_payloads(len: usize, seed: u64) -> (Vec<u8>, Vec<u8>) {
    let a = random_payload(len, seed);
    let mut b = a.clone();
    b[0] = b[0].wrapping_add(1);
    (a, b)
}

#[tokio::test]
async fn test_shared_blocks_fetched_once() -> anyhow::Result<()> {
    let (a, b) = twin_payloads(40_000, 21);
    let remote = MemoryBlockStore::new();
    let root_a = add_resource(&remote, max(512), DataTag::BlockBody, &a)?;
    let root_b = add_resource(&remote, max(512), DataTag::BlockBody, &b)?;
    assert_ne!(root_a, root_b);

    let mut node = Node::in_memory(remote, &config(512, 1 << 20, 30))?;
    node.download(root_a);
    node.download(root_b);

    let mut done = vec![node.next_update().await?.root, node.next_update().await?.root];
    done.sort();
    let mut expected = vec![root_a, root_b];
    expected.sort();
    assert_eq!(done, expected);

    let blob = split_blob(max(512), DataTag::BlockBody, &a)?;
    for (id, _) in blob.blocks.iter().skip(1) {
        assert_eq!(node.network.requests_for(id), 1, "block {id} fetched twice");
    }
    assert_eq!(node.network.requests_for(&root_a), 1);
    assert_eq!(node.network.requests_for(&root_b), 1);

    let (_, read_a) = read_resource(&*node.store, node.max_block_size, &root_a)?;
    let (_, read_b) = read_resource(&*node.store, node.max_block_size, &root_b)?;
    assert_eq!(read_a, a);
    assert_eq!(read_b, b);

    node.stop().await
}

/// Blocks left by an earlier download are reused instead of fetched.
#[tokio::test]
async fn test_resident_blocks_not_refetched() -> anyhow::Result<()> {
    let (a, b) = twin_payloads(20_000, 22);
    let remote = MemoryBlockStore::new();
    let root_a = add_resource(&remote, max(256), DataTag::BlockBody, &a)?;
    let root_b = add_resource(&remote, max(256), DataTag::BlockBody, &b)?;

    let mut node = Node::in_memory(remote, &config(256, 1 << 20, 30))?;
    node.download(root_a);
    assert_eq!(node.next_update().await?.root, root_a);
    let after_a = node.network.total_requests();

    node.download(root_b);
    assert_eq!(node.next_update().await?.root, root_b);
    assert_eq!(node.network.total_requests(), after_a + 1);
    assert_eq!(node.network.requests_for(&root_b), 1);

    let (_, read_b) = read_resource(&*node.store, node.max_block_size, &root_b)?;
    assert_eq!(read_b, b);

    node.stop().await
}

/// A blob of zeros repeats the same leaf many times within one tree.
#[tokio::test]
async fn test_repeated_leaves_within_one_tree() -> anyhow::Result<()> {
    let payload = vec![0u8; 30_000];
    let remote = MemoryBlockStore::new();
    let root = add_resource(&remote, max(256), DataTag::BlockBody, &payload)?;
    let blob = split_blob(max(256), DataTag::BlockBody, &payload)?;
    let distinct: std::collections::HashSet<_> = blob.blocks.iter().map(|(id, _)| *id).collect();
    assert!(distinct.len() < blob.blocks.len());

    let mut node = Node::in_memory(remote, &config(256, 1 << 20, 30))?;
    node.download(root);
    assert_eq!(node.next_update().await?.root, root);
    assert_eq!(node.network.total_requests(), distinct.len());

    let (_, read) = read_resource(&*node.store, node.max_block_size, &root)?;
    assert_eq!(read, payload);

    node.stop().await
}
