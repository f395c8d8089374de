use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use tokio::sync::watch;

use crate::crypto::InfoHash;
use crate::swarm::{SwarmClient, SwarmHandle, TorrentSpec};
use crate::torrent::Metainfo;

/// In-memory swarm whose counters are driven by the test.
#[derive(Clone, Default)]
pub struct MockSwarm {
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    handles: Mutex<HashMap<InfoHash, Arc<MockHandle>>>,
    registrations: Mutex<Vec<(InfoHash, PathBuf)>>,
    unregistered: Mutex<Vec<InfoHash>>,
    peer_hints: Mutex<Vec<String>>,
    fail_register: AtomicBool,
    closed: AtomicBool,
}

impl MockSwarm {
    pub fn handle(&self, info_hash: &InfoHash) -> Option<Arc<MockHandle>> {
        self.state.handles.lock().unwrap().get(info_hash).cloned()
    }

    pub fn registrations(&self) -> Vec<(InfoHash, PathBuf)> {
        self.state.registrations.lock().unwrap().clone()
    }

    pub fn unregistered(&self) -> Vec<InfoHash> {
        self.state.unregistered.lock().unwrap().clone()
    }

    pub fn peer_hints(&self) -> Vec<String> {
        self.state.peer_hints.lock().unwrap().clone()
    }

    pub fn fail_register(&self, fail: bool) {
        self.state.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

impl SwarmClient for MockSwarm {
    type Handle = MockHandle;

    async fn register(&self, spec: TorrentSpec, storage: &Path) -> Result<Arc<MockHandle>> {
        if self.state.fail_register.load(Ordering::SeqCst) {
            bail!("registration rejected");
        }
        let total = spec
            .metainfo
            .as_ref()
            .map_or(0, |metainfo| metainfo.info.total_size());
        let (metadata, _) = watch::channel(spec.metainfo);
        let handle = Arc::new(MockHandle {
            info_hash: spec.info_hash,
            total: AtomicU64::new(total),
            completed: AtomicU64::new(0),
            metadata,
            calls: Mutex::new(Vec::new()),
        });
        self.state
            .handles
            .lock()
            .unwrap()
            .insert(spec.info_hash, Arc::clone(&handle));
        self.state
            .registrations
            .lock()
            .unwrap()
            .push((spec.info_hash, storage.to_path_buf()));
        Ok(handle)
    }

    fn unregister(&self, info_hash: &InfoHash) {
        self.state.handles.lock().unwrap().remove(info_hash);
        self.state.unregistered.lock().unwrap().push(*info_hash);
    }

    fn add_peer_hints(&self, peers: &[String]) {
        self.state.peer_hints.lock().unwrap().extend_from_slice(peers);
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

pub struct MockHandle {
    info_hash: InfoHash,
    total: AtomicU64,
    completed: AtomicU64,
    metadata: watch::Sender<Option<Arc<Metainfo>>>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockHandle {
    pub fn complete(&self, bytes: u64) {
        self.completed.store(bytes, Ordering::SeqCst);
    }

    pub fn complete_all(&self) {
        self.complete(self.total.load(Ordering::SeqCst));
    }

    pub fn provide_metadata(&self, metainfo: Metainfo) {
        self.total
            .store(metainfo.info.total_size(), Ordering::SeqCst);
        self.metadata.send_replace(Some(Arc::new(metainfo)));
    }

    /// Transition primitives invoked so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

impl SwarmHandle for MockHandle {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    async fn metadata_ready(&self) -> Result<Arc<Metainfo>> {
        let mut metadata = self.metadata.subscribe();
        let metainfo = metadata.wait_for(Option::is_some).await?.clone();
        metainfo.ok_or_else(|| anyhow!("metadata channel closed"))
    }

    fn bytes_completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    fn bytes_missing(&self) -> u64 {
        self.total
            .load(Ordering::SeqCst)
            .saturating_sub(self.bytes_completed())
    }

    fn download_all(&self) {
        self.record("download_all");
    }

    fn verify_data(&self) {
        self.record("verify_data");
    }

    fn pause(&self) {
        self.record("pause");
    }

    fn is_seeding(&self) -> bool {
        self.bytes_missing() == 0
    }
}
