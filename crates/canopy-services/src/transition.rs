//! Validation of one delivered block against every root awaiting it.
//!
//! This is the pure half of block processing: it reads root states but never
//! changes them, and reports what the caller has to apply.

use std::collections::{HashMap, HashSet};

use canopy_core::config::TagConfig;
use canopy_core::wire::{decode_block, extract_header};
use canopy_core::{
    BlockId, BlockSchema, DataTag, DepthIndices, FormatError, MaxBlockSize, NodeIndex, RootId,
};

use crate::pending::Awaiting;
use crate::root_state::RootDownloadState;

/// Fixed parameters of a downloader.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub max_block_size: MaxBlockSize,
    pub layout: DepthIndices,
    pub tags: &'a HashMap<DataTag, TagConfig>,
}

/// A child position discovered through a validated block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildAssignment {
    pub id: BlockId,
    pub root: RootId,
    pub ix: NodeIndex,
}

/// Outcome of validating one block.
#[derive(Debug, Default)]
pub struct Transition {
    /// Children of every validated position, in link order.
    pub children: Vec<ChildAssignment>,
    /// Schemas read from root headers, to be assigned.
    pub schemas: Vec<(RootId, BlockSchema)>,
    /// Roots the block proved malformed, with the cause.
    pub malformed: HashMap<RootId, FormatError>,
    /// Roots for which every awaited position validated.
    pub validated: HashSet<RootId>,
}

/// Validate `raw` for every root in `awaiting`.
pub fn step(
    raw: &[u8],
    awaiting: &Awaiting,
    roots: &HashMap<RootId, RootDownloadState>,
    ctx: &StepContext<'_>,
) -> Transition {
    let mut out = Transition::default();

    let block = match decode_block(raw) {
        Ok(block) => block,
        Err(e) => {
            out.malformed = awaiting.keys().map(|root| (*root, e.clone())).collect();
            return out;
        }
    };

    for (root, positions) in awaiting {
        let Some(state) = roots.get(root) else {
            tracing::error!(root = %root, "block awaited by a root with no download state");
            continue;
        };

        let fresh = if positions.contains(&0) {
            match root_schema(block.payload, state.tag(), ctx) {
                Ok(schema) => Some(schema),
                Err(e) => {
                    out.malformed.insert(*root, e);
                    continue;
                }
            }
        } else {
            None
        };

        let Some(schema) = fresh.as_ref().or_else(|| state.schema()) else {
            tracing::error!(
                root = %root,
                positions = ?positions,
                "non-root position awaited before the schema is known"
            );
            continue;
        };

        let mut children = Vec::new();
        let mut failure = None;
        for &ix in positions {
            if let Err(e) = schema.check(ix, raw.len(), block.links.len()) {
                failure = Some(e);
                break;
            }
            let first = ctx.layout.first_child_id(ix);
            children.extend(block.links.iter().enumerate().map(|(offset, id)| {
                ChildAssignment {
                    id: *id,
                    root: *root,
                    ix: first + offset,
                }
            }));
        }

        if let Some(e) = failure {
            out.malformed.insert(*root, e);
            continue;
        }
        if let Some(schema) = fresh {
            out.schemas.push((*root, schema));
        }
        out.children.extend(children);
        out.validated.insert(*root);
    }

    out
}

/// Read and check the root header, then lay out the declared blob.
fn root_schema(
    data: &[u8],
    expected: DataTag,
    ctx: &StepContext<'_>,
) -> Result<BlockSchema, FormatError> {
    let (rest, declared) = extract_header(data)?;
    let &tag = rest.first().ok_or(FormatError::MissingTag)?;
    if tag != u8::from(expected) {
        return Err(FormatError::TagMismatch {
            expected: expected.into(),
            actual: tag,
        });
    }

    let config = ctx
        .tags
        .get(&expected)
        .ok_or(FormatError::UnsupportedTag(expected))?;
    let len = declared.checked_sub(1).ok_or(FormatError::MissingTag)?;
    if len > config.max_size {
        return Err(FormatError::PayloadTooLarge {
            len,
            max: config.max_size,
        });
    }

    Ok(BlockSchema::length_prefixed(ctx.max_block_size, declared))
}
