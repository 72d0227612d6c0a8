//! Splitting a blob into blocks and joining it back together.
//!
//! The blob is first framed as a length-prefixed stream:
//!
//!   [length: u32 LE][tag: u8][payload]
//!
//! where `length` counts the tag and payload. The stream is laid out with
//! `BlockSchema::length_prefixed` and consumed in depth-first preorder, so
//! the root always starts with the header. Blocks are hashed bottom-up:
//! children always sit at higher positions than their parent, so walking
//! positions in reverse sees every child id before its parent needs it.

use bytes::Bytes;

use crate::crypto::BlockId;
use crate::layout::{DepthIndices, NodeIndex};
use crate::schema::{BlockSchema, MaxBlockSize};
use crate::wire::{
    decode_block, encode_block, extract_header, length_header, DataTag, FormatError,
    LENGTH_PREFIX_SIZE,
};

/// A blob encoded as blocks.
#[derive(Debug, Clone)]
pub struct EncodedBlob {
    pub root: BlockId,
    /// Blocks in position order; the root comes first.
    pub blocks: Vec<(BlockId, Bytes)>,
}

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("block {0} is missing")]
    Missing(BlockId),

    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Positions of a schema's tree in depth-first preorder.
fn preorder(schema: &BlockSchema, layout: &DepthIndices) -> Vec<NodeIndex> {
    let mut order = Vec::with_capacity(schema.total_blocks());
    let mut stack = vec![0];
    while let Some(ix) = stack.pop() {
        order.push(ix);
        let first = layout.first_child_id(ix);
        stack.extend((first..first + schema.link_count(ix)).rev());
    }
    order
}

/// Encode `payload` under `tag` as a tree of blocks of at most `max` bytes.
pub fn split_blob(max: MaxBlockSize, tag: DataTag, payload: &[u8]) -> Result<EncodedBlob, FormatError> {
    let declared = payload.len() + 1;
    let mut stream = Vec::with_capacity(LENGTH_PREFIX_SIZE + declared);
    stream.extend_from_slice(&length_header(declared)?);
    stream.push(u8::from(tag));
    stream.extend_from_slice(payload);

    let schema = BlockSchema::length_prefixed(max, declared);
    let layout = DepthIndices::for_block_size(max);
    let total = schema.total_blocks();

    let mut data_ranges = vec![0..0; total];
    let mut offset = 0;
    for ix in preorder(&schema, &layout) {
        let len = schema.data_size(ix);
        data_ranges[ix] = offset..offset + len;
        offset += len;
    }

    let mut ids = vec![BlockId::from_bytes([0; 32]); total];
    let mut raws = vec![Bytes::new(); total];
    for ix in (0..total).rev() {
        let first = layout.first_child_id(ix);
        let links = &ids[first.min(total)..(first + schema.link_count(ix)).min(total)];
        let raw = encode_block(links, &stream[data_ranges[ix].clone()])?;
        ids[ix] = BlockId::of(&raw);
        raws[ix] = Bytes::from(raw);
    }

    Ok(EncodedBlob {
        root: ids[0],
        blocks: ids.into_iter().zip(raws).collect(),
    })
}

/// Reassemble the blob rooted at `root`, fetching blocks through `lookup`.
///
/// Every block is checked against the schema derived from the root header,
/// so a corrupt store yields an error rather than a wrong payload.
pub fn join_blob<F>(
    max: MaxBlockSize,
    root: &BlockId,
    mut lookup: F,
) -> Result<(DataTag, Vec<u8>), JoinError>
where
    F: FnMut(&BlockId) -> Option<Bytes>,
{
    let layout = DepthIndices::for_block_size(max);
    let root_raw = lookup(root).ok_or(JoinError::Missing(*root))?;
    let (_, declared) = extract_header(decode_block(&root_raw)?.payload)?;
    let schema = BlockSchema::length_prefixed(max, declared);

    let mut stream = Vec::with_capacity(schema.data_length());
    let mut root_raw = Some(root_raw);
    let mut stack = vec![(0, *root)];
    while let Some((ix, id)) = stack.pop() {
        // The root is popped first; everything after it comes from `lookup`.
        let raw = match root_raw.take() {
            Some(raw) => raw,
            None => lookup(&id).ok_or(JoinError::Missing(id))?,
        };
        let block = decode_block(&raw)?;
        schema.check(ix, raw.len(), block.links.len())?;
        stream.extend_from_slice(block.payload);

        let first = layout.first_child_id(ix);
        for (offset, link) in block.links.iter().enumerate().rev() {
            stack.push((first + offset, *link));
        }
    }

    let body = &stream[LENGTH_PREFIX_SIZE..];
    if body.len() != declared {
        return Err(FormatError::LengthMismatch {
            declared,
            actual: body.len(),
        }
        .into());
    }
    let (&tag, payload) = body.split_first().ok_or(FormatError::MissingTag)?;
    Ok((DataTag::try_from(tag)?, payload.to_vec()))
}
