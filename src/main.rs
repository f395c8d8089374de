use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use size::Size;

use crate::client::{Config, Manager};
use crate::swarm::local::LocalSwarm;

mod bencoding;
mod client;
mod codec;
mod console;
mod crypto;
mod storage;
mod swarm;
mod torrent;

const USAGE: &str = "usage: torrentfs <data-dir> [--tracker=<url>]... [--tmp-dir=<dir>] \
[--tick-ms=<ms>] [--report-every=<ticks>] [--budget-floor=<bytes>] [--budget-factor=<f>] \
[--max-workers=<n>] [<descriptor|magnet>]...";

/// Command line: the config plus the identifiers to add on startup.
fn parse_args(mut args: impl Iterator<Item = String>) -> Result<(Config, Vec<String>)> {
    let data_dir = args.next().ok_or_else(|| anyhow!(USAGE))?;
    let mut config = Config::new(PathBuf::from(data_dir));
    let mut trackers = Vec::new();
    let mut identifiers = Vec::new();
    for arg in args {
        let Some(flag) = arg.strip_prefix("--") else {
            identifiers.push(arg);
            continue;
        };
        let (name, value) = flag.split_once('=').ok_or_else(|| anyhow!(USAGE))?;
        config = match name {
            "tracker" => {
                trackers.push(value.to_string());
                config
            }
            "tmp-dir" => config.with_tmp_dir(PathBuf::from(value)),
            "tick-ms" => config.with_tick_interval(Duration::from_millis(parse_flag(name, value)?)),
            "report-every" => config.with_report_every(parse_flag(name, value)?),
            "budget-floor" => config.with_budget_floor(Size::from_bytes(parse_flag::<u64>(
                name, value,
            )?)),
            "budget-factor" => config.with_budget_factor(parse_flag(name, value)?),
            "max-workers" => config.with_max_workers(parse_flag(name, value)?),
            _ => return Err(anyhow!(USAGE)),
        };
    }
    Ok((config.with_trackers(trackers), identifiers))
}

fn parse_flag<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid --{} \"{}\"", name, value))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let (config, identifiers) = parse_args(std::env::args().skip(1))?;
    let mut manager = Manager::new(config, LocalSwarm::new())?;
    manager.start().await?;

    let mut replies = Vec::with_capacity(identifiers.len());
    for identifier in identifiers {
        let reply = manager.submit_add(identifier.as_str()).await?;
        replies.push((identifier, reply));
    }
    for (identifier, reply) in replies {
        match reply.wait().await {
            Ok(added) => info!("{}: {:?}", identifier, added),
            Err(err) => warn!("{}: {:#}", identifier, err),
        }
    }

    tokio::select! {
        result = console::run(&manager, console::stdin_lines(), tokio::io::stdout()) => {
            result?;
            // stdin closed, keep serving until interrupted
            tokio::signal::ctrl_c().await?;
        }
        result = tokio::signal::ctrl_c() => result?,
    }
    info!("shutting down...");
    manager.stop().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> impl Iterator<Item = String> {
        line.split_whitespace()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn parse_defaults() {
        let (config, identifiers) = parse_args(args("/srv/models a.torrent")).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.tmp_dir, PathBuf::from("/srv/models/.tmp"));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(identifiers, vec!["a.torrent".to_string()]);
    }

    #[test]
    fn parse_every_flag() {
        let (config, identifiers) = parse_args(args(
            "/srv/models --tracker=udp://a --tmp-dir=/scratch --tick-ms=250 --report-every=4 \
             --budget-floor=1024 --budget-factor=2 --max-workers=3 --tracker=udp://b \
             magnet:?xt=urn:btih:c47d187067c6cf953245f128b5fde62a3b8fa3b0",
        ))
        .unwrap();

        assert_eq!(config.trackers, vec!["udp://a".to_string(), "udp://b".to_string()]);
        assert_eq!(config.tmp_dir, PathBuf::from("/scratch"));
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.report_every, 4);
        assert_eq!(config.floor_bytes(), 1024);
        assert_eq!(config.budget_factor, 2.0);
        assert_eq!(config.max_workers, 3);
        assert_eq!(identifiers.len(), 1);
    }

    #[test]
    fn reject_bad_arguments() {
        assert!(parse_args(args("")).is_err());
        assert!(parse_args(args("/srv/models --verbose")).is_err());
        assert!(parse_args(args("/srv/models --colour=red")).is_err());
        assert!(parse_args(args("/srv/models --max-workers=many")).is_err());
    }
}
