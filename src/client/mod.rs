mod command;
mod config;
mod dispatcher;
mod scheduler;
mod torrent;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError};

use anyhow::{Context, Result, anyhow, bail};
use log::{error, info, warn};
use tokio::fs;
use tokio::sync::Mutex;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::crypto::InfoHash;
use crate::storage::Layout;
use crate::storage::verify::verify;
use crate::swarm::{SwarmClient, SwarmHandle, TorrentSpec};
use crate::torrent::magnet::is_magnet_uri;
use crate::torrent::{Magnet, Metainfo};

pub use command::{Added, Removed, Reply};
pub use config::Config;
pub use scheduler::StatusCounts;
pub use torrent::{Progress, Status};

use command::{Inbox, Queues};
use torrent::Torrent;

/// Tracks items by content id and drives them from registration to promotion.
///
/// Commands are queued and processed by a dispatcher task, a scheduler task advances every
/// item once per tick. Both run between [`Manager::start`] and [`Manager::stop`].
pub struct Manager<C: SwarmClient> {
    shared: Arc<Shared<C>>,
    queues: Queues,
    inbox: Option<Inbox>,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: SwarmClient> Manager<C> {
    pub fn new(config: Config, client: C) -> Result<Self> {
        config.validate()?;
        let (queues, inbox) = command::queues(&config);
        let shared = Arc::new(Shared {
            layout: Layout::new(config.data_dir.clone(), config.tmp_dir.clone()),
            trackers: std::sync::Mutex::new(config.trackers.clone()),
            config,
            client,
            torrents: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            waiters: TaskTracker::new(),
        });
        Ok(Self {
            shared,
            queues,
            inbox: Some(inbox),
            tasks: Vec::new(),
        })
    }

    /// Creates the storage roots and launches the dispatcher and the scheduler.
    pub async fn start(&mut self) -> Result<()> {
        if self.shared.shutdown.is_cancelled() {
            bail!("manager is stopped");
        }
        if self.inbox.is_none() {
            bail!("manager already started");
        }
        self.shared.layout.create_dirs().await?;
        let inbox = self
            .inbox
            .take()
            .ok_or_else(|| anyhow!("manager already started"))?;
        let shared = Arc::clone(&self.shared);
        self.tasks.push(tokio::spawn(dispatcher::run(shared, inbox)));
        let shared = Arc::clone(&self.shared);
        self.tasks.push(tokio::spawn(scheduler::run(shared)));
        info!("manager started in {}", self.shared.config.data_dir.display());
        Ok(())
    }

    /// Signals shutdown and joins the dispatcher and the scheduler.
    pub async fn stop(&mut self) -> Result<()> {
        self.shared.shutdown.cancel();
        if self.inbox.take().is_some() {
            self.shared.client.close();
        }
        for task in self.tasks.drain(..) {
            task.await?;
        }
        info!("manager stopped");
        Ok(())
    }

    /// Queues an add of a descriptor path or a magnet uri.
    pub async fn submit_add(&self, identifier: impl Into<String>) -> Result<Reply<Added>> {
        command::submit(&self.queues.adds, &self.shared.shutdown, identifier.into()).await
    }

    /// Queues a remove of a descriptor path or a magnet uri.
    pub async fn submit_remove(&self, identifier: impl Into<String>) -> Result<Reply<Removed>> {
        command::submit(&self.queues.removes, &self.shared.shutdown, identifier.into()).await
    }

    /// Queues a budget update. The reply carries the enforced limitation, `None` for unknown
    /// items.
    pub async fn submit_budget_update(
        &self,
        info_hash: InfoHash,
        bytes: u64,
    ) -> Result<Reply<Option<u64>>> {
        command::submit(
            &self.queues.updates,
            &self.shared.shutdown,
            (info_hash, bytes),
        )
        .await
    }

    /// Adds tracker urls for items registered from now on. Known urls are skipped.
    pub fn set_trackers(&self, trackers: &[String]) {
        let mut known = self
            .shared
            .trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for tracker in trackers {
            if !known.contains(tracker) {
                known.push(tracker.clone());
            }
        }
    }

    pub async fn progress(&self, info_hash: &InfoHash) -> Option<Progress> {
        let torrents = self.shared.torrents.lock().await;
        torrents.get(info_hash).map(|torrent| torrent.progress())
    }

    pub async fn tracked(&self) -> Vec<Progress> {
        let torrents = self.shared.torrents.lock().await;
        torrents.values().map(|torrent| torrent.progress()).collect()
    }
}

impl<C: SwarmClient> Drop for Manager<C> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

/// State shared by the manager, the dispatcher workers, the metadata waiters and the scheduler.
pub(crate) struct Shared<C: SwarmClient> {
    config: Config,
    layout: Layout,
    client: C,
    /// Membership lock, held across check, registration and insert
    torrents: Mutex<HashMap<InfoHash, Arc<Torrent<C::Handle>>>>,
    trackers: std::sync::Mutex<Vec<String>>,
    shutdown: CancellationToken,
    waiters: TaskTracker,
}

impl<C: SwarmClient> Shared<C> {
    fn trackers(&self) -> Vec<String> {
        self.trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn new_torrent(&self, handle: Arc<C::Handle>, storage: &Path) -> Arc<Torrent<C::Handle>> {
        Arc::new(Torrent::new(
            handle,
            Layout::descriptor_path(storage),
            self.config.floor_bytes(),
            self.shutdown.child_token(),
        ))
    }

    async fn add(self: &Arc<Self>, identifier: &str) -> Result<Added> {
        if is_magnet_uri(identifier) {
            let magnet: Magnet = identifier.parse()?;
            self.add_magnet(magnet).await
        } else {
            self.add_descriptor(Path::new(identifier)).await
        }
    }

    async fn add_magnet(self: &Arc<Self>, magnet: Magnet) -> Result<Added> {
        let info_hash = magnet.info_hash;
        for dir in [
            self.layout.data_path(&info_hash),
            self.layout.tmp_path(&info_hash),
        ] {
            let descriptor = Layout::descriptor_path(&dir);
            if !fs::try_exists(&descriptor).await.unwrap_or(false) {
                continue;
            }
            match self.add_descriptor(&descriptor).await {
                Ok(added) => return Ok(added),
                Err(err) => warn!("unable to reuse {}: {:#}", descriptor.display(), err),
            }
        }

        let mut torrents = self.torrents.lock().await;
        if torrents.contains_key(&info_hash) {
            return Ok(Added::AlreadyTracked);
        }
        let mut spec = TorrentSpec::from(&magnet);
        spec.add_trackers(&self.trackers());
        if !magnet.peers.is_empty() {
            self.client.add_peer_hints(&magnet.peers);
        }
        let storage = self.layout.tmp_path(&info_hash);
        let handle = self
            .client
            .register(spec, &storage)
            .await
            .with_context(|| format!("unable to register {}", info_hash))?;
        let torrent = self.new_torrent(handle, &storage);
        torrents.insert(info_hash, Arc::clone(&torrent));
        drop(torrents);

        info!("tracking {} from magnet, waiting for metadata", info_hash);
        self.await_metadata(&torrent);
        Ok(Added::Tracked)
    }

    async fn add_descriptor(self: &Arc<Self>, path: &Path) -> Result<Added> {
        let metainfo = Arc::new(Metainfo::load(path).await?);
        let info_hash = metainfo.info.info_hash;
        if self.torrents.lock().await.contains_key(&info_hash) {
            return Ok(Added::AlreadyTracked);
        }

        let data_path = self.layout.data_path(&info_hash);
        let reused = fs::try_exists(&data_path).await.unwrap_or(false)
            && verify_existing(&metainfo, &data_path).await;
        let storage = if reused {
            data_path
        } else {
            self.layout.tmp_path(&info_hash)
        };

        let mut torrents = self.torrents.lock().await;
        if torrents.contains_key(&info_hash) {
            return Ok(Added::AlreadyTracked);
        }
        let descriptor = Layout::descriptor_path(&storage);
        if !fs::try_exists(&descriptor).await.unwrap_or(false) {
            metainfo.save(&descriptor).await?;
        }
        let mut spec = TorrentSpec::from_metainfo(Arc::clone(&metainfo));
        spec.add_trackers(&self.trackers());
        if !metainfo.nodes.is_empty() {
            self.client.add_peer_hints(&metainfo.nodes);
        }
        let handle = self
            .client
            .register(spec, &storage)
            .await
            .with_context(|| format!("unable to register {}", info_hash))?;
        let torrent = self.new_torrent(handle, &storage);
        torrents.insert(info_hash, Arc::clone(&torrent));
        drop(torrents);

        if reused {
            info!("tracking {} ({}), reusing verified data", info_hash, metainfo.info.name());
            torrent.seed();
        } else {
            info!("tracking {} ({})", info_hash, metainfo.info.name());
            torrent.run();
        }
        Ok(Added::Tracked)
    }

    async fn remove(&self, identifier: &str) -> Result<Removed> {
        let info_hash = if is_magnet_uri(identifier) {
            identifier.parse::<Magnet>()?.info_hash
        } else {
            Metainfo::load(identifier).await?.info.info_hash
        };
        let mut torrents = self.torrents.lock().await;
        let Some(torrent) = torrents.remove(&info_hash) else {
            return Ok(Removed::NotFound);
        };
        torrent.cancel();
        self.client.unregister(&info_hash);
        info!("removed {}", info_hash);
        Ok(Removed::Removed)
    }

    async fn update_budget(&self, info_hash: &InfoHash, bytes: u64) -> Option<u64> {
        let torrent = self.torrents.lock().await.get(info_hash).cloned()?;
        Some(torrent.update_budget(bytes, self.config.budget_factor))
    }

    /// Spawns the metadata wait of a pending item, unless one is already in flight.
    fn await_metadata(self: &Arc<Self>, torrent: &Arc<Torrent<C::Handle>>) {
        if !torrent.pending() || !torrent.begin_metadata_wait() {
            return;
        }
        let shared = Arc::clone(self);
        let torrent = Arc::clone(torrent);
        self.waiters.spawn(async move {
            let metadata = tokio::select! {
                _ = torrent.token().cancelled() => return,
                metadata = torrent.handle().metadata_ready() => metadata,
            };
            match metadata {
                Ok(metainfo) => shared.metadata_received(&torrent, &metainfo).await,
                Err(err) => {
                    warn!("metadata of {} unavailable: {:#}", torrent.info_hash(), err);
                    torrent.end_metadata_wait();
                }
            }
        });
    }

    async fn metadata_received(&self, torrent: &Arc<Torrent<C::Handle>>, metainfo: &Metainfo) {
        let info_hash = *torrent.info_hash();
        let persisted = if metainfo.info.info_hash != info_hash {
            Err(anyhow!("metadata hashes to {}", metainfo.info.info_hash))
        } else {
            metainfo.save(torrent.torrent_path()).await
        };
        if let Err(err) = persisted {
            error!("unable to persist descriptor of {}: {:#}", info_hash, err);
            self.forget(torrent).await;
            return;
        }
        if torrent.got_metadata() {
            info!("received metadata of {} ({})", info_hash, metainfo.info.name());
        }
    }

    /// Drops `torrent` unless it was already replaced by a newer entry.
    async fn forget(&self, torrent: &Arc<Torrent<C::Handle>>) {
        let info_hash = torrent.info_hash();
        let mut torrents = self.torrents.lock().await;
        if torrents
            .get(info_hash)
            .is_some_and(|current| Arc::ptr_eq(current, torrent))
        {
            torrents.remove(info_hash);
            torrent.cancel();
            self.client.unregister(info_hash);
        }
    }
}

/// True when `dir` holds data matching every piece of `metainfo`.
async fn verify_existing(metainfo: &Arc<Metainfo>, dir: &Path) -> bool {
    let metainfo = Arc::clone(metainfo);
    let root = dir.to_path_buf();
    let result = task::spawn_blocking(move || verify(&metainfo.info, &root)).await;
    match result {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!("existing data in {} failed verification: {:#}", dir.display(), err);
            false
        }
        Err(err) => {
            warn!("verification of {} aborted: {}", dir.display(), err);
            false
        }
    }
}
