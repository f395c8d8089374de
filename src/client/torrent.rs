use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::crypto::InfoHash;
use crate::swarm::SwarmHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Waiting for the descriptor
    Pending = 0,
    Paused = 1,
    Running = 2,
    /// Complete and promoted, terminal
    Seeding = 3,
}

impl From<u8> for Status {
    fn from(value: u8) -> Self {
        match value {
            0 => Status::Pending,
            1 => Status::Paused,
            2 => Status::Running,
            3 => Status::Seeding,
            _ => panic!("status must be in 0..=3, got {}", value),
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Pending => "pending",
            Status::Paused => "paused",
            Status::Running => "running",
            Status::Seeding => "seeding",
        };
        f.write_str(name)
    }
}

/// Point in time view of one tracked item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub info_hash: InfoHash,
    pub status: Status,
    pub bytes_requested: u64,
    pub bytes_limitation: u64,
    pub bytes_completed: u64,
    pub bytes_missing: u64,
}

impl Display for Progress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} completed={} missing={} requested={} limit={}",
            self.info_hash,
            self.status,
            self.bytes_completed,
            self.bytes_missing,
            self.bytes_requested,
            self.bytes_limitation
        )
    }
}

/// One tracked item: a swarm handle plus its status and byte budget.
///
/// Every field the scheduler and the command workers share is atomic, so no lock is held while
/// reading or advancing an item.
pub struct Torrent<H> {
    info_hash: InfoHash,
    handle: Arc<H>,
    torrent_path: PathBuf,
    status: AtomicU8,
    bytes_requested: AtomicU64,
    bytes_limitation: AtomicU64,
    bytes_completed: AtomicU64,
    bytes_missing: AtomicU64,
    metadata_wait: AtomicBool,
    token: CancellationToken,
}

impl<H: SwarmHandle> Torrent<H> {
    pub fn new(
        handle: Arc<H>,
        torrent_path: PathBuf,
        floor: u64,
        token: CancellationToken,
    ) -> Self {
        Self {
            info_hash: handle.info_hash(),
            handle,
            torrent_path,
            status: AtomicU8::new(Status::Pending as u8),
            bytes_requested: AtomicU64::new(floor),
            bytes_limitation: AtomicU64::new(floor),
            bytes_completed: AtomicU64::new(0),
            bytes_missing: AtomicU64::new(0),
            metadata_wait: AtomicBool::new(false),
            token,
        }
    }

    pub fn info_hash(&self) -> &InfoHash {
        &self.info_hash
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Working descriptor location.
    pub fn torrent_path(&self) -> &Path {
        &self.torrent_path
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn status(&self) -> Status {
        Status::from(self.status.load(Ordering::Acquire))
    }

    pub fn pending(&self) -> bool {
        self.status() == Status::Pending
    }

    #[allow(dead_code)]
    pub fn paused(&self) -> bool {
        self.status() == Status::Paused
    }

    #[allow(dead_code)]
    pub fn running(&self) -> bool {
        self.status() == Status::Running
    }

    #[allow(dead_code)]
    pub fn seeding(&self) -> bool {
        self.status() == Status::Seeding
    }

    pub fn bytes_completed(&self) -> u64 {
        self.bytes_completed.load(Ordering::Acquire)
    }

    pub fn bytes_missing(&self) -> u64 {
        self.bytes_missing.load(Ordering::Acquire)
    }

    pub fn bytes_limitation(&self) -> u64 {
        self.bytes_limitation.load(Ordering::Acquire)
    }

    /// Pulls the byte counters from the swarm.
    pub fn refresh(&self) {
        self.bytes_completed
            .store(self.handle.bytes_completed(), Ordering::Release);
        self.bytes_missing
            .store(self.handle.bytes_missing(), Ordering::Release);
    }

    /// Records a caller's budget and returns the enforced limitation.
    ///
    /// The limitation only grows: it becomes `requested * factor` when `requested` exceeds it.
    pub fn update_budget(&self, requested: u64, factor: f64) -> u64 {
        self.bytes_requested.store(requested, Ordering::Release);
        let expanded = ((requested as f64) * factor) as u64;
        let result = self
            .bytes_limitation
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (requested > current).then_some(expanded.max(current))
            });
        match result {
            Ok(previous) => {
                let limitation = expanded.max(previous);
                debug!("{} budget raised to {}", self.info_hash, limitation);
                limitation
            }
            Err(current) => current,
        }
    }

    /// Pending or Paused to Running, asks the swarm for every piece.
    pub fn run(&self) -> bool {
        let changed = self.transition(&[Status::Pending, Status::Paused], Status::Running);
        if changed {
            debug!("{} running", self.info_hash);
            self.handle.download_all();
        }
        changed
    }

    /// Running to Paused, drops outstanding requests.
    pub fn pause(&self) -> bool {
        let changed = self.transition(&[Status::Running], Status::Paused);
        if changed {
            debug!("{} paused at {} bytes", self.info_hash, self.bytes_completed());
            self.handle.pause();
        }
        changed
    }

    /// Any live status to Seeding, re-checks the data and serves all of it.
    pub fn seed(&self) -> bool {
        let changed = self.transition(
            &[Status::Pending, Status::Paused, Status::Running],
            Status::Seeding,
        );
        if changed {
            debug!("{} seeding", self.info_hash);
            self.handle.verify_data();
            self.handle.download_all();
        }
        changed
    }

    /// Pending to Paused once the descriptor has been persisted.
    pub fn got_metadata(&self) -> bool {
        let changed = self.transition(&[Status::Pending], Status::Paused);
        if changed {
            self.handle.pause();
        }
        changed
    }

    /// Claims the metadata wait, false if one is already in flight.
    pub fn begin_metadata_wait(&self) -> bool {
        !self.metadata_wait.swap(true, Ordering::AcqRel)
    }

    pub fn end_metadata_wait(&self) {
        self.metadata_wait.store(false, Ordering::Release);
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn progress(&self) -> Progress {
        Progress {
            info_hash: self.info_hash,
            status: self.status(),
            bytes_requested: self.bytes_requested.load(Ordering::Acquire),
            bytes_limitation: self.bytes_limitation(),
            bytes_completed: self.bytes_completed(),
            bytes_missing: self.bytes_missing(),
        }
    }

    fn transition(&self, from: &[Status], to: Status) -> bool {
        self.status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                from.contains(&Status::from(current)).then_some(to as u8)
            })
            .is_ok()
    }
}
