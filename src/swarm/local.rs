use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow, bail};
use bit_set::BitSet;
use log::{debug, info};
use tokio::task::{self, JoinHandle};

use crate::crypto::InfoHash;
use crate::storage::verify::piece_states;
use crate::swarm::{SwarmClient, SwarmHandle, TorrentSpec};
use crate::torrent::Metainfo;

/// Disk-backed swarm client without any networking.
///
/// Items are served from whatever verified pieces already sit in their storage directory, so
/// data copied there by another tool is picked up on the next rescan. Metadata cannot be
/// exchanged, magnet registrations are rejected.
#[derive(Default)]
pub struct LocalSwarm {
    handles: Mutex<HashMap<InfoHash, Arc<LocalHandle>>>,
    closed: AtomicBool,
}

impl LocalSwarm {
    pub fn new() -> Self {
        Self::default()
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<InfoHash, Arc<LocalHandle>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SwarmClient for LocalSwarm {
    type Handle = LocalHandle;

    async fn register(&self, spec: TorrentSpec, storage: &Path) -> Result<Arc<LocalHandle>> {
        if self.closed.load(Ordering::Acquire) {
            bail!("swarm client is closed");
        }
        let metainfo = spec.metainfo.ok_or_else(|| {
            anyhow!(
                "no descriptor for {}, metadata exchange unsupported",
                spec.info_hash
            )
        })?;
        let inner = Arc::new(Inner {
            metainfo,
            root: storage.to_path_buf(),
            pieces: Mutex::new(BitSet::new()),
            wanted: AtomicBool::new(false),
        });
        // counters stay at zero until the first scan finishes
        let handle = Arc::new(LocalHandle { inner });
        handle.rescan();
        self.handles().insert(spec.info_hash, Arc::clone(&handle));
        debug!("registered {} at {}", spec.info_hash, storage.display());
        Ok(handle)
    }

    fn unregister(&self, info_hash: &InfoHash) {
        if self.handles().remove(info_hash).is_some() {
            debug!("unregistered {}", info_hash);
        }
    }

    fn add_peer_hints(&self, peers: &[String]) {
        debug!("ignoring {} peer hints", peers.len());
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let handles = std::mem::take(&mut *self.handles());
        info!("closed local swarm with {} items", handles.len());
    }
}

struct Inner {
    metainfo: Arc<Metainfo>,
    root: PathBuf,
    pieces: Mutex<BitSet>,
    wanted: AtomicBool,
}

impl Inner {
    fn pieces(&self) -> MutexGuard<'_, BitSet> {
        self.pieces.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scan(&self) {
        let pieces = piece_states(&self.metainfo.info, &self.root);
        *self.pieces() = pieces;
    }
}

pub struct LocalHandle {
    inner: Arc<Inner>,
}

impl LocalHandle {
    fn rescan(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        task::spawn_blocking(move || inner.scan())
    }
}

impl SwarmHandle for LocalHandle {
    fn info_hash(&self) -> InfoHash {
        self.inner.metainfo.info.info_hash
    }

    async fn metadata_ready(&self) -> Result<Arc<Metainfo>> {
        Ok(Arc::clone(&self.inner.metainfo))
    }

    fn bytes_completed(&self) -> u64 {
        let info = &self.inner.metainfo.info;
        self.inner
            .pieces()
            .iter()
            .map(|piece| info.piece_size(piece))
            .sum()
    }

    fn bytes_missing(&self) -> u64 {
        let total = self.inner.metainfo.info.total_size();
        total.saturating_sub(self.bytes_completed())
    }

    fn download_all(&self) {
        self.inner.wanted.store(true, Ordering::Release);
        self.rescan();
    }

    fn verify_data(&self) {
        self.rescan();
    }

    fn pause(&self) {
        self.inner.wanted.store(false, Ordering::Release);
    }

    fn is_seeding(&self) -> bool {
        self.inner.wanted.load(Ordering::Acquire) && self.bytes_missing() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{fs, time};

    use super::*;
    use crate::torrent::Magnet;
    use crate::torrent::tests::single_file;

    const DATA: &[u8] = b"the quick brown fox jumps over the lazy dog";

    #[tokio::test]
    async fn register_complete_directory() {
        let dir = tempfile::tempdir().unwrap();
        let metainfo = Arc::new(single_file("fox.txt", DATA, 8));
        fs::write(dir.path().join("fox.txt"), DATA).await.unwrap();
        let swarm = LocalSwarm::new();

        let handle = swarm
            .register(TorrentSpec::from_metainfo(metainfo), dir.path())
            .await
            .unwrap();
        handle.rescan().await.unwrap();

        assert_eq!(handle.bytes_completed(), DATA.len() as u64);
        assert_eq!(handle.bytes_missing(), 0);
        assert!(!handle.is_seeding());
        handle.download_all();
        assert!(handle.is_seeding());
        handle.pause();
        assert!(!handle.is_seeding());
    }

    #[tokio::test]
    async fn register_partial_directory() {
        let dir = tempfile::tempdir().unwrap();
        let metainfo = Arc::new(single_file("fox.txt", DATA, 8));
        let mut partial = DATA.to_vec();
        partial[0] ^= 1;
        fs::write(dir.path().join("fox.txt"), &partial).await.unwrap();
        let swarm = LocalSwarm::new();

        let handle = swarm
            .register(TorrentSpec::from_metainfo(metainfo), dir.path())
            .await
            .unwrap();
        handle.rescan().await.unwrap();

        assert_eq!(handle.bytes_missing(), 8);
        assert_eq!(handle.bytes_completed(), DATA.len() as u64 - 8);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn register_does_not_wait_for_scan() {
        let dir = tempfile::tempdir().unwrap();
        let metainfo = Arc::new(single_file("fox.txt", DATA, 8));
        // opening a fifo blocks the scan until a writer shows up
        let fifo = dir.path().join("fox.txt");
        let status = std::process::Command::new("mkfifo")
            .arg(&fifo)
            .status()
            .unwrap();
        assert!(status.success());
        let swarm = LocalSwarm::new();

        let registered = time::timeout(
            Duration::from_secs(5),
            swarm.register(TorrentSpec::from_metainfo(metainfo), dir.path()),
        )
        .await;
        let writer =
            task::spawn_blocking(move || std::fs::OpenOptions::new().write(true).open(fifo));
        let handle = registered.unwrap().unwrap();

        assert_eq!(handle.bytes_completed(), 0);
        assert_eq!(handle.bytes_missing(), DATA.len() as u64);
        writer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn reject_magnet_registration() {
        let dir = tempfile::tempdir().unwrap();
        let magnet: Magnet = "magnet:?xt=urn:btih:c47d187067c6cf953245f128b5fde62a3b8fa3b0"
            .parse()
            .unwrap();
        let swarm = LocalSwarm::new();

        let result = swarm.register(TorrentSpec::from(&magnet), dir.path()).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reject_registration_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let metainfo = Arc::new(single_file("fox.txt", DATA, 8));
        let swarm = LocalSwarm::new();
        swarm.close();

        let result = swarm
            .register(TorrentSpec::from_metainfo(metainfo), dir.path())
            .await;

        assert!(result.is_err());
    }
}
