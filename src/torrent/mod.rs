mod download_type;
mod info;
pub mod magnet;

use std::path::Path;

use anyhow::{Context, Error, Result, anyhow};
use tokio::fs::{self, File};

use crate::bencoding::Value;
use crate::codec::AsyncDecoder;

pub use download_type::{DownloadType, File as FileEntry};
pub use info::Info;
pub use magnet::Magnet;

// https://wiki.theory.org/BitTorrentSpecification#Metainfo_File_Structure

/// Descriptor of one downloadable item.
///
/// The original info dictionary is kept next to its parsed form so the descriptor can be
/// written back without changing its info hash.
#[derive(Debug, PartialEq, Clone)]
pub struct Metainfo {
    pub announce: Option<String>,
    pub announce_list: Vec<Vec<String>>,
    /// DHT bootstrap hints as `host:port`
    pub nodes: Vec<String>,
    pub info: Info,
    info_value: Value,
}

impl Metainfo {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .await
            .with_context(|| format!("unable to open {}", path.display()))?;
        let value = Value::decode(&mut file)
            .await
            .with_context(|| format!("malformed descriptor {}", path.display()))?;
        Metainfo::try_from(value).with_context(|| format!("invalid descriptor {}", path.display()))
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, Value::from(self).to_bytes())
            .await
            .with_context(|| format!("unable to write {}", path.display()))
    }

    /// Tracker tiers, falling back to the single announce url.
    pub fn trackers(&self) -> Vec<Vec<String>> {
        if !self.announce_list.is_empty() {
            return self.announce_list.clone();
        }
        match &self.announce {
            Some(announce) => vec![vec![announce.clone()]],
            None => Vec::new(),
        }
    }
}

impl TryFrom<Value> for Metainfo {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        let announce = match value.try_remove_entry("announce")? {
            Some(announce) => Some(announce.try_into()?),
            None => None,
        };
        let announce_list = match value.try_remove_entry("announce-list")? {
            Some(tiers) => parse_tiers(tiers)?,
            None => Vec::new(),
        };
        let nodes = match value.try_remove_entry("nodes")? {
            Some(nodes) => parse_nodes(nodes)?,
            None => Vec::new(),
        };
        let info_value = value.remove_entry("info")?;
        let info = Info::try_from(info_value.clone())?;
        Ok(Metainfo {
            announce,
            announce_list,
            nodes,
            info,
            info_value,
        })
    }
}

impl From<&Metainfo> for Value {
    fn from(metainfo: &Metainfo) -> Self {
        let mut value = Value::dictionary().with_entry("info", metainfo.info_value.clone());
        if let Some(announce) = &metainfo.announce {
            value = value.with_entry("announce", Value::string(announce));
        }
        if !metainfo.announce_list.is_empty() {
            let tiers = metainfo.announce_list.iter().fold(Value::list(), |list, tier| {
                let tier = tier
                    .iter()
                    .fold(Value::list(), |tier, url| tier.with_value(Value::string(url)));
                list.with_value(tier)
            });
            value = value.with_entry("announce-list", tiers);
        }
        let nodes: Vec<Value> = metainfo.nodes.iter().filter_map(|node| encode_node(node)).collect();
        if !nodes.is_empty() {
            value = value.with_entry("nodes", Value::List(nodes));
        }
        value
    }
}

fn parse_tiers(tiers: Value) -> Result<Vec<Vec<String>>> {
    let tiers: Vec<Value> = tiers.try_into()?;
    let mut result = Vec::with_capacity(tiers.len());
    for tier in tiers {
        let urls: Vec<Value> = tier.try_into()?;
        let urls = urls
            .into_iter()
            .map(String::try_from)
            .collect::<Result<Vec<_>>>()?;
        result.push(urls);
    }
    Ok(result)
}

fn parse_nodes(nodes: Value) -> Result<Vec<String>> {
    let nodes: Vec<Value> = nodes.try_into()?;
    let mut result = Vec::with_capacity(nodes.len());
    for node in nodes {
        let mut parts: Vec<Value> = node.try_into()?;
        if parts.len() != 2 {
            return Err(anyhow!("node must be a [host, port] pair"));
        }
        let port: u64 = parts.remove(1).try_into()?;
        let host: String = parts.remove(0).try_into()?;
        result.push(format!("{}:{}", host, port));
    }
    Ok(result)
}

fn encode_node(node: &str) -> Option<Value> {
    let (host, port) = node.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    Some(
        Value::list()
            .with_value(Value::string(host))
            .with_value(Value::Integer(port.into())),
    )
}
