use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use canopy_core::config::{DownloaderConfig, TagSettings};
use canopy_core::{BlockId, DataTag, MaxBlockSize, RootId};
use canopy_services::{
    BlockStore, Downloader, DownloaderHandle, FetchError, MemoryBlockStore, NetworkSession,
    ResourceUpdate, SessionHandle,
};

/// How long a test waits for an update before giving up.
pub const UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

// ── Logging ───────────────────────────────────────────────────────────────────

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ── Fixtures ──────────────────────────────────────────────────────────────────

pub fn max(n: usize) -> MaxBlockSize {
    MaxBlockSize::new(n).expect("test block size should be valid")
}

pub fn random_payload(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut payload = vec![0u8; len];
    rng.fill(&mut payload[..]);
    payload
}

/// Downloader settings with one `block_body` tag.
pub fn config(max_block_size: usize, max_size: usize, timeout_secs: u64) -> DownloaderConfig {
    DownloaderConfig {
        max_block_size,
        tags: vec![TagSettings {
            tag: DataTag::BlockBody,
            max_size,
            download_timeout_secs: timeout_secs,
        }],
    }
}

static DIRS: AtomicU64 = AtomicU64::new(0);

/// Fresh, empty directory under the system temp dir.
pub fn temp_dir(name: &str) -> PathBuf {
    let id = DIRS.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "canopy-it-{}-{}-{}",
        name,
        std::process::id(),
        id
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

// ── Peer network ──────────────────────────────────────────────────────────────

/// A peer that answers fetches from its own block store.
///
/// Blocks can be withheld (never answered) or tampered with (answered
/// with other bytes) to exercise the failure paths.
pub struct PeerNetwork {
    remote: MemoryBlockStore,
    handle: DownloaderHandle,
    withheld: Mutex<HashSet<BlockId>>,
    tampered: Mutex<HashMap<BlockId, Bytes>>,
    refuse: AtomicBool,
    requests: Mutex<Vec<BlockId>>,
}

impl PeerNetwork {
    pub fn new(remote: MemoryBlockStore, handle: DownloaderHandle) -> Self {
        Self {
            remote,
            handle,
            withheld: Mutex::new(HashSet::new()),
            tampered: Mutex::new(HashMap::new()),
            refuse: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn withhold(&self, id: BlockId) {
        self.withheld.lock().unwrap().insert(id);
    }

    pub fn tamper(&self, id: BlockId, data: Bytes) {
        self.tampered.lock().unwrap().insert(id, data);
    }

    /// Serve every block faithfully again.
    pub fn heal(&self) {
        self.withheld.lock().unwrap().clear();
        self.tampered.lock().unwrap().clear();
        self.refuse.store(false, Ordering::Relaxed);
    }

    pub fn refuse(&self) {
        self.refuse.store(true, Ordering::Relaxed);
    }

    /// How many times `id` was requested.
    pub fn requests_for(&self, id: &BlockId) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| *r == id)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl NetworkSession for PeerNetwork {
    fn new_session(&self, cancel: CancellationToken) -> SessionHandle {
        SessionHandle::new(cancel)
    }

    fn fetch(&self, session: &SessionHandle, blocks: Vec<BlockId>) -> Result<(), FetchError> {
        if self.refuse.load(Ordering::Relaxed) {
            return Err(FetchError::Transport("peer refused the request".into()));
        }
        if session.is_cancelled() {
            return Err(FetchError::Cancelled(session.id()));
        }

        self.requests.lock().unwrap().extend(blocks.iter().copied());
        let withheld = self.withheld.lock().unwrap();
        let tampered = self.tampered.lock().unwrap();
        for id in blocks {
            if withheld.contains(&id) {
                continue;
            }
            let data = match tampered.get(&id) {
                Some(data) => data.clone(),
                None => match self.remote.view(&id) {
                    Ok(data) => data,
                    Err(_) => continue,
                },
            };
            self.handle.deliver(id, data);
        }
        Ok(())
    }
}

// ── Node ──────────────────────────────────────────────────────────────────────

/// A running downloader with its local store and a peer to fetch from.
pub struct Node {
    pub store: Arc<dyn BlockStore>,
    pub network: Arc<PeerNetwork>,
    pub handle: DownloaderHandle,
    pub max_block_size: MaxBlockSize,
    updates: mpsc::UnboundedReceiver<ResourceUpdate>,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl Node {
    pub fn spawn(
        store: Arc<dyn BlockStore>,
        remote: MemoryBlockStore,
        config: &DownloaderConfig,
    ) -> Result<Self> {
        init_tracing();

        let (handle, events) = DownloaderHandle::channel();
        let (updates_tx, updates) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let network = Arc::new(PeerNetwork::new(remote, handle.clone()));

        let downloader = Downloader::from_config(
            config,
            store.clone(),
            network.clone(),
            handle.clone(),
            updates_tx,
        )
        .context("invalid downloader config")?;
        let task = tokio::spawn(downloader.run(events, shutdown_rx));

        Ok(Self {
            store,
            network,
            handle,
            max_block_size: config.block_size()?,
            updates,
            shutdown,
            task,
        })
    }

    /// Node with an in-memory store.
    pub fn in_memory(remote: MemoryBlockStore, config: &DownloaderConfig) -> Result<Self> {
        Self::spawn(Arc::new(MemoryBlockStore::new()), remote, config)
    }

    pub fn download(&self, root: RootId) {
        assert!(
            self.handle.download(root, DataTag::BlockBody),
            "downloader stopped"
        );
    }

    pub async fn next_update(&mut self) -> Result<ResourceUpdate> {
        match tokio::time::timeout(UPDATE_TIMEOUT, self.updates.recv()).await {
            Ok(Some(update)) => Ok(update),
            Ok(None) => bail!("update channel closed"),
            Err(_) => bail!("no update within {}s", UPDATE_TIMEOUT.as_secs()),
        }
    }

    /// Fail if any update arrives within `window`.
    pub async fn expect_quiet(&mut self, window: Duration) -> Result<()> {
        match tokio::time::timeout(window, self.updates.recv()).await {
            Ok(Some(update)) => bail!("unexpected update: {update:?}"),
            Ok(None) => bail!("update channel closed"),
            Err(_) => Ok(()),
        }
    }

    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        tokio::time::timeout(UPDATE_TIMEOUT, self.task)
            .await
            .context("downloader did not stop")?
            .context("downloader task panicked")?;
        Ok(())
    }
}
