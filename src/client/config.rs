use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use size::Size;

/// Configuration settings for the manager
#[derive(Clone, Debug)]
pub struct Config {
    // Storage Settings
    /// Root for promoted items, `<data_dir>/<hex>`
    pub data_dir: PathBuf,
    /// Root for items still downloading, `<tmp_dir>/<hex>`
    pub tmp_dir: PathBuf,
    /// Tracker urls merged into the first tier of every registered item
    pub trackers: Vec<String>,

    // Scheduler Settings
    /// Interval between scheduler passes over the tracked items
    pub tick_interval: Duration,
    /// Number of ticks between status reports
    pub report_every: u32,

    // Budget Settings
    /// Lower bound of every item's byte budget
    pub budget_floor: Size,
    /// Headroom applied when a caller raises a budget
    pub budget_factor: f64,

    // Dispatcher Settings
    /// Capacity of the add queue
    pub add_queue: usize,
    /// Capacity of the remove queue
    pub remove_queue: usize,
    /// Capacity of the budget update queue
    pub update_queue: usize,
    /// Maximum number of commands processed concurrently
    pub max_workers: usize,
}

impl Config {
    pub fn with_tmp_dir(mut self, tmp_dir: PathBuf) -> Self {
        self.tmp_dir = tmp_dir;
        self
    }

    pub fn with_trackers(mut self, trackers: Vec<String>) -> Self {
        self.trackers = trackers;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_report_every(mut self, ticks: u32) -> Self {
        self.report_every = ticks;
        self
    }

    pub fn with_budget_floor(mut self, floor: Size) -> Self {
        self.budget_floor = floor;
        self
    }

    pub fn with_budget_factor(mut self, factor: f64) -> Self {
        self.budget_factor = factor;
        self
    }

    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    pub fn floor_bytes(&self) -> u64 {
        self.budget_floor.bytes().max(0) as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            bail!("tick interval must be positive");
        }
        if self.report_every == 0 {
            bail!("report interval must be positive");
        }
        if self.add_queue == 0 || self.remove_queue == 0 || self.update_queue == 0 {
            bail!("queue capacities must be positive");
        }
        if self.max_workers == 0 {
            bail!("max workers must be positive");
        }
        if self.budget_factor.is_nan() || self.budget_factor < 1.0 {
            bail!("budget factor must be at least 1.0, got {}", self.budget_factor);
        }
        if self.budget_floor.bytes() < 0 {
            bail!("budget floor must not be negative");
        }
        Ok(())
    }
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        let tmp_dir = data_dir.join(".tmp");
        Self {
            data_dir,
            tmp_dir,
            trackers: Vec::new(),
            tick_interval: Duration::from_secs(1),
            report_every: 10,
            budget_floor: Size::from_kibibytes(512),
            budget_factor: 1.25,
            add_queue: 32,
            remove_queue: 16,
            update_queue: 32,
            max_workers: 32,
        }
    }
}
