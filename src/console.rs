use std::str::FromStr;

use anyhow::{Error, Result, anyhow, bail};
use log::{debug, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::client::Manager;
use crate::crypto::InfoHash;
use crate::swarm::SwarmClient;

pub const HELP: &str = "commands: add <descriptor|magnet>, remove <descriptor|magnet>, \
budget <info-hash> <bytes>, status [info-hash], trackers <url>...";

/// One line typed on the control console.
#[derive(Debug, PartialEq)]
pub enum Request {
    Add(String),
    Remove(String),
    Budget(InfoHash, u64),
    Status(Option<InfoHash>),
    Trackers(Vec<String>),
}

impl FromStr for Request {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        match command {
            "add" | "remove" if rest.is_empty() => bail!("{} expects an identifier", command),
            "add" => Ok(Request::Add(rest.to_string())),
            "remove" => Ok(Request::Remove(rest.to_string())),
            "budget" => {
                let mut parts = rest.split_whitespace();
                let (Some(info_hash), Some(bytes), None) = (parts.next(), parts.next(), parts.next())
                else {
                    bail!("budget expects an info hash and a byte count");
                };
                let bytes = bytes
                    .parse::<u64>()
                    .map_err(|err| anyhow!("invalid byte count \"{}\": {}", bytes, err))?;
                Ok(Request::Budget(InfoHash::from_hex(info_hash)?, bytes))
            }
            "status" if rest.is_empty() => Ok(Request::Status(None)),
            "status" => Ok(Request::Status(Some(InfoHash::from_hex(rest)?))),
            "trackers" if rest.is_empty() => bail!("trackers expects at least one url"),
            "trackers" => Ok(Request::Trackers(
                rest.split_whitespace().map(str::to_string).collect(),
            )),
            _ => bail!("unknown command \"{}\"", command),
        }
    }
}

/// Reads lines until `lines` closes, applies each to `manager` and writes the outcome to `out`.
pub async fn run<C: SwarmClient>(
    manager: &Manager<C>,
    mut lines: mpsc::Receiver<String>,
    mut out: impl AsyncWrite + Unpin,
) -> Result<()> {
    while let Some(line) = lines.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = match line.parse::<Request>() {
            Ok(request) => {
                debug!("console request {:?}", request);
                match execute(manager, request).await {
                    Ok(response) => response,
                    Err(err) => format!("error: {:#}", err),
                }
            }
            Err(err) => format!("error: {:#}\n{}", err, HELP),
        };
        out.write_all(response.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
    }
    debug!("console input closed");
    Ok(())
}

async fn execute<C: SwarmClient>(manager: &Manager<C>, request: Request) -> Result<String> {
    let response = match request {
        Request::Add(identifier) => {
            let added = manager.submit_add(identifier.as_str()).await?.wait().await?;
            format!("{:?} {}", added, identifier)
        }
        Request::Remove(identifier) => {
            let removed = manager
                .submit_remove(identifier.as_str())
                .await?
                .wait()
                .await?;
            format!("{:?} {}", removed, identifier)
        }
        Request::Budget(info_hash, bytes) => {
            let reply = manager.submit_budget_update(info_hash, bytes).await?;
            match reply.wait().await? {
                Some(limitation) => format!("{} limit={}", info_hash, limitation),
                None => format!("{} is not tracked", info_hash),
            }
        }
        Request::Status(Some(info_hash)) => match manager.progress(&info_hash).await {
            Some(progress) => progress.to_string(),
            None => format!("{} is not tracked", info_hash),
        },
        Request::Status(None) => {
            let mut tracked = manager.tracked().await;
            tracked.sort_by_key(|progress| progress.info_hash.hex());
            let mut lines: Vec<_> = tracked.iter().map(ToString::to_string).collect();
            lines.push(format!("{} items", tracked.len()));
            lines.join("\n")
        }
        Request::Trackers(trackers) => {
            manager.set_trackers(&trackers);
            format!("{} trackers added", trackers.len())
        }
    };
    Ok(response)
}

/// Forwards stdin lines from a dedicated thread, a blocking read cannot be cancelled on a
/// runtime worker.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("unable to read stdin: {}", err);
                    break;
                }
            }
        }
    });
    rx
}
