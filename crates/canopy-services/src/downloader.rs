//! Downloader: drives every in-flight root from kickoff to a terminal state.
//!
//! All inputs arrive as `DownloaderEvent`s on one queue and are applied one
//! at a time by `Downloader::run`, which owns the pending index and the root
//! states outright. Deadline tasks and network deliveries only ever send
//! events; nothing in here awaits while state is being changed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use canopy_core::config::{ConfigError, DownloaderConfig, TagConfig};
use canopy_core::{BlockId, DataTag, DepthIndices, MaxBlockSize, RootId};

use crate::notify::ResourceUpdate;
use crate::pending::PendingIndex;
use crate::root_state::RootDownloadState;
use crate::session::{NetworkSession, SessionId};
use crate::store::{BlockStore, RootStatus, StoreError};
use crate::transition::{self, StepContext};

/// Inputs of the downloader.
#[derive(Debug, Clone)]
pub enum DownloaderEvent {
    /// Start downloading `root`, expecting a payload of kind `tag`.
    Kickoff { root: RootId, tag: DataTag },
    /// Bytes claimed to be block `id` arrived from the network.
    BlockDelivered { id: BlockId, data: Bytes },
    /// The deadline of `root`'s download under `session` passed.
    DeadlineFired { root: RootId, session: SessionId },
}

/// Sending side of the downloader's event queue.
#[derive(Debug, Clone)]
pub struct DownloaderHandle {
    tx: mpsc::UnboundedSender<DownloaderEvent>,
}

impl DownloaderHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DownloaderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Request a download. Returns false once the downloader has stopped.
    pub fn download(&self, root: RootId, tag: DataTag) -> bool {
        self.send(DownloaderEvent::Kickoff { root, tag })
    }

    /// Hand a block received from the network to the downloader.
    pub fn deliver(&self, id: BlockId, data: Bytes) -> bool {
        self.send(DownloaderEvent::BlockDelivered { id, data })
    }

    fn send(&self, event: DownloaderEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

pub struct Downloader {
    store: Arc<dyn BlockStore>,
    network: Arc<dyn NetworkSession>,
    max_block_size: MaxBlockSize,
    layout: DepthIndices,
    tags: HashMap<DataTag, TagConfig>,
    pending: PendingIndex,
    roots: HashMap<RootId, RootDownloadState>,
    handle: DownloaderHandle,
    updates: mpsc::UnboundedSender<ResourceUpdate>,
    cancel: CancellationToken,
}

impl Downloader {
    pub fn new(
        store: Arc<dyn BlockStore>,
        network: Arc<dyn NetworkSession>,
        max_block_size: MaxBlockSize,
        tags: HashMap<DataTag, TagConfig>,
        handle: DownloaderHandle,
        updates: mpsc::UnboundedSender<ResourceUpdate>,
    ) -> Self {
        Self {
            store,
            network,
            max_block_size,
            layout: DepthIndices::for_block_size(max_block_size),
            tags,
            pending: PendingIndex::new(),
            roots: HashMap::new(),
            handle,
            updates,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(
        config: &DownloaderConfig,
        store: Arc<dyn BlockStore>,
        network: Arc<dyn NetworkSession>,
        handle: DownloaderHandle,
        updates: mpsc::UnboundedSender<ResourceUpdate>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            store,
            network,
            config.block_size()?,
            config.tag_configs()?,
            handle,
            updates,
        ))
    }

    pub fn handle(&self) -> DownloaderHandle {
        self.handle.clone()
    }

    /// Consume events until shutdown is signalled.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<DownloaderEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(in_flight = self.roots.len(), "downloader shutting down");
                    break;
                }

                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        tracing::debug!("event queue closed");
                        break;
                    }
                },
            }
        }
        self.shutdown();
    }

    /// Apply one event.
    pub fn handle_event(&mut self, event: DownloaderEvent) {
        match event {
            DownloaderEvent::Kickoff { root, tag } => self.kickoff(root, tag),
            DownloaderEvent::BlockDelivered { id, data } => self.block_delivered(id, data),
            DownloaderEvent::DeadlineFired { root, session } => self.deadline_fired(root, session),
        }
    }

    /// Abandon every download and cancel all sessions.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        self.roots.clear();
        self.pending = PendingIndex::new();
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    /// Number of roots being downloaded.
    pub fn in_flight(&self) -> usize {
        self.roots.len()
    }

    pub fn is_in_flight(&self, root: &RootId) -> bool {
        self.roots.contains_key(root)
    }

    /// Unresolved positions of an in-flight root.
    pub fn outstanding(&self, root: &RootId) -> Option<usize> {
        self.roots.get(root).map(|state| state.outstanding())
    }

    /// Number of distinct blocks some root is waiting for.
    pub fn pending_blocks(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: &BlockId) -> bool {
        self.pending.contains(id)
    }

    // ── Kickoff ───────────────────────────────────────────────────────────────

    fn kickoff(&mut self, root: RootId, tag: DataTag) {
        if self.roots.contains_key(&root) {
            tracing::debug!(root = %root, "download already in flight");
            return;
        }

        let timeout = match self.tags.get(&tag) {
            Some(config) => config.download_timeout,
            None => {
                tracing::error!(root = %root, tag = %tag, "no limits configured for tag");
                Duration::ZERO
            }
        };

        if let Err(e) = self.store.set_status(&root, RootStatus::Partial) {
            tracing::debug!(root = %root, error = %e, "root not marked partial");
            match self.store.get_status(&root) {
                Ok(Some(RootStatus::Full)) => self.notify(ResourceUpdate::added(root)),
                Ok(_) => {}
                Err(e) => tracing::warn!(root = %root, error = %e, "failed to read root status"),
            }
            return;
        }

        let cancel = self.cancel.child_token();
        let session = self.network.new_session(cancel.clone());
        self.spawn_deadline(root, session.id(), cancel, timeout);
        self.roots
            .insert(root, RootDownloadState::new(root, tag, session));
        let already_pending = self.pending.contains(&root);
        self.pending.insert(root, root, 0);
        tracing::info!(root = %root, tag = %tag, "download started");
        if already_pending {
            tracing::debug!(block = %root, "root block already pending");
            return;
        }

        match self.store.view(&root) {
            Ok(raw) => {
                tracing::trace!(block = %root, "root block resident");
                self.process_block(root, raw, false);
            }
            Err(StoreError::NotFound(_)) => self.fetch(vec![root]),
            Err(e) => {
                tracing::warn!(block = %root, error = %e, "block store lookup failed");
                self.fetch(vec![root]);
            }
        }
    }

    fn spawn_deadline(
        &self,
        root: RootId,
        session: SessionId,
        cancel: CancellationToken,
        timeout: Duration,
    ) {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    handle.send(DownloaderEvent::DeadlineFired { root, session });
                }
            }
        });
    }

    // ── Block processing ──────────────────────────────────────────────────────

    fn block_delivered(&mut self, id: BlockId, data: Bytes) {
        if !id.matches(&data) {
            tracing::warn!(block = %id, len = data.len(), "delivered block does not match its id, discarding");
            return;
        }
        self.process_block(id, data, true);
    }

    /// Resolve every position awaiting `id`, expand the children that
    /// validated, and finish the roots that have nothing left to wait for.
    /// Children already in the store are processed in the same pass.
    fn process_block(&mut self, id: BlockId, raw: Bytes, from_network: bool) {
        let mut worklist = VecDeque::from([(id, raw, from_network)]);
        let mut batch = Vec::new();
        let mut touched = HashSet::new();

        while let Some((id, raw, from_network)) = worklist.pop_front() {
            let Some(awaiting) = self.pending.take(&id) else {
                tracing::debug!(block = %id, "block not awaited, dropping");
                continue;
            };

            for (root, positions) in &awaiting {
                if let Some(state) = self.roots.get_mut(root) {
                    state.resolve(positions.len());
                    touched.insert(*root);
                }
            }

            let ctx = StepContext {
                max_block_size: self.max_block_size,
                layout: self.layout,
                tags: &self.tags,
            };
            let step = transition::step(&raw, &awaiting, &self.roots, &ctx);

            if from_network && !step.validated.is_empty() {
                if let Err(e) = self.store.put(&id, &raw) {
                    tracing::warn!(block = %id, error = %e, "failed to store block");
                }
            }

            for (root, schema) in step.schemas {
                if let Some(state) = self.roots.get_mut(&root) {
                    tracing::debug!(
                        root = %root,
                        blocks = schema.total_blocks(),
                        depth = schema.depth(),
                        "schema assigned"
                    );
                    state.assign_schema(schema);
                }
            }

            for (root, e) in &step.malformed {
                tracing::warn!(root = %root, block = %id, error = %e, "malformed block, abandoning download");
                if self.free_root(root) {
                    self.notify(ResourceUpdate::broken(*root));
                }
            }

            for child in step.children {
                let Some(state) = self.roots.get_mut(&child.root) else {
                    continue;
                };
                let already_pending = self.pending.contains(&child.id);
                self.pending.insert(child.id, child.root, child.ix);
                state.expect(child.id);
                if already_pending {
                    tracing::debug!(block = %child.id, root = %child.root, "block already pending");
                    continue;
                }

                match self.store.view(&child.id) {
                    Ok(raw) => {
                        tracing::trace!(block = %child.id, "block resident");
                        worklist.push_back((child.id, raw, false));
                    }
                    Err(StoreError::NotFound(_)) => batch.push(child.id),
                    Err(e) => {
                        tracing::warn!(block = %child.id, error = %e, "block store lookup failed");
                        batch.push(child.id);
                    }
                }
            }
        }

        // Roots freed during the pass may have left blocks nobody wants.
        batch.retain(|id| self.pending.contains(id));
        if !batch.is_empty() {
            self.fetch(batch);
        }

        for root in touched {
            if self.roots.get(&root).is_some_and(|state| state.is_complete()) {
                self.complete(root);
            }
        }
    }

    /// Fetch `blocks` through the session of any root waiting on them.
    fn fetch(&mut self, blocks: Vec<BlockId>) {
        let interested: HashSet<RootId> = blocks
            .iter()
            .filter_map(|id| self.pending.get(id))
            .flat_map(|awaiting| awaiting.keys().copied())
            .collect();
        let Some(session) = interested
            .iter()
            .find_map(|root| self.roots.get(root))
            .map(|state| state.session().clone())
        else {
            tracing::error!(blocks = blocks.len(), "no in-flight root to fetch blocks for");
            return;
        };

        let count = blocks.len();
        match self.network.fetch(&session, blocks) {
            Ok(()) => tracing::debug!(session = %session.id(), blocks = count, "fetch scheduled"),
            Err(e) => {
                tracing::error!(
                    session = %session.id(),
                    blocks = count,
                    roots = interested.len(),
                    error = %e,
                    "fetch failed, abandoning downloads"
                );
                let mut stranded = Vec::new();
                for root in &interested {
                    stranded.extend(self.release_root(root).unwrap_or_default());
                }
                self.refetch(stranded);
            }
        }
    }

    // ── Terminal states ───────────────────────────────────────────────────────

    fn complete(&mut self, root: RootId) {
        if let Err(e) = self.store.set_status(&root, RootStatus::Full) {
            tracing::warn!(root = %root, error = %e, "failed to mark root full");
        }
        self.free_root(&root);
        tracing::info!(root = %root, "download complete");
        self.notify(ResourceUpdate::added(root));
    }

    fn deadline_fired(&mut self, root: RootId, session: SessionId) {
        match self.roots.get(&root) {
            Some(state) if state.session().id() == session => {
                tracing::info!(
                    root = %root,
                    outstanding = state.outstanding(),
                    "download timed out"
                );
                self.free_root(&root);
            }
            _ => tracing::debug!(root = %root, session = %session, "deadline of a finished download"),
        }
    }

    /// Drop a root's state, cancel its session and withdraw it from every
    /// pending entry. Blocks other roots still wait on are requested again
    /// under a surviving session. Returns false if the root was not in flight.
    fn free_root(&mut self, root: &RootId) -> bool {
        match self.release_root(root) {
            Some(stranded) => {
                self.refetch(stranded);
                true
            }
            None => false,
        }
    }

    /// Tear down `root` and return its blocks that are still pending for
    /// some other root. Their only request may have gone out under the
    /// session just cancelled.
    fn release_root(&mut self, root: &RootId) -> Option<Vec<BlockId>> {
        let state = self.roots.remove(root)?;
        state.cancel();
        self.pending.remove_root(root, state.descendants());
        Some(
            state
                .descendants()
                .iter()
                .filter(|id| self.pending.contains(id))
                .copied()
                .collect(),
        )
    }

    fn refetch(&mut self, mut blocks: Vec<BlockId>) {
        blocks.retain(|id| self.pending.contains(id));
        if blocks.is_empty() {
            return;
        }
        tracing::debug!(blocks = blocks.len(), "re-requesting blocks shared with a freed root");
        self.fetch(blocks);
    }

    fn notify(&self, update: ResourceUpdate) {
        tracing::debug!(root = %update.root, kind = %update.kind, "resource update");
        if self.updates.send(update).is_err() {
            tracing::debug!("resource update receiver dropped");
        }
    }
}
