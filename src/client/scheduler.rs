use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::client::Shared;
use crate::client::torrent::{Status, Torrent};
use crate::swarm::{SwarmClient, SwarmHandle};

/// Number of tracked items per status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub paused: usize,
    pub running: usize,
    pub seeding: usize,
}

impl StatusCounts {
    fn add(&mut self, status: Status) {
        match status {
            Status::Pending => self.pending += 1,
            Status::Paused => self.paused += 1,
            Status::Running => self.running += 1,
            Status::Seeding => self.seeding += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.paused + self.running + self.seeding
    }
}

impl Display for StatusCounts {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pending={} paused={} running={} seeding={}",
            self.pending, self.paused, self.running, self.seeding
        )
    }
}

pub(crate) async fn run<C: SwarmClient>(shared: Arc<Shared<C>>) {
    let mut ticks = interval_with_delay(shared.config.tick_interval);
    let mut elapsed = 0;
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = ticks.tick() => (),
        }
        if shared.shutdown.is_cancelled() {
            break;
        }
        elapsed += 1;
        let report = elapsed >= shared.config.report_every;
        if report {
            elapsed = 0;
        }
        tick(&shared, report).await;
    }
    info!("scheduler stopped");
}

/// One pass over every tracked item.
pub(crate) async fn tick<C: SwarmClient>(shared: &Arc<Shared<C>>, report: bool) -> StatusCounts {
    let torrents: Vec<_> = shared.torrents.lock().await.values().cloned().collect();
    let mut counts = StatusCounts::default();
    for torrent in torrents {
        // removed since the snapshot
        if torrent.token().is_cancelled() {
            continue;
        }
        match torrent.status() {
            Status::Pending => shared.await_metadata(&torrent),
            Status::Seeding => {
                torrent.refresh();
                if report {
                    let serving = torrent.handle().is_seeding();
                    debug!("{} serving={}", torrent.progress(), serving);
                }
            }
            Status::Paused | Status::Running => {
                torrent.refresh();
                advance(shared, &torrent).await;
            }
        }
        counts.add(torrent.status());
    }
    if report {
        info!("{} items: {}", counts.total(), counts);
    }
    counts
}

pub(crate) async fn advance<C: SwarmClient>(shared: &Shared<C>, torrent: &Torrent<C::Handle>) {
    if torrent.bytes_missing() == 0 {
        match shared.layout.promote(torrent.info_hash()).await {
            // removed while promoting, the handle is already unregistered
            Ok(_) if torrent.token().is_cancelled() => {
                debug!("{} removed during promotion", torrent.info_hash());
            }
            Ok(_) => {
                torrent.seed();
            }
            // retried on the next tick
            Err(err) => warn!("unable to promote {}: {:#}", torrent.info_hash(), err),
        }
    } else if torrent.bytes_completed() >= torrent.bytes_limitation() {
        torrent.pause();
    } else {
        torrent.run();
    }
}

fn interval_with_delay(period: Duration) -> Interval {
    let start = Instant::now() + period;
    let mut interval = time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
