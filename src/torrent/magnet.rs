use std::str::FromStr;

use anyhow::{Error, Result, anyhow};
use url::Url;

use crate::crypto::InfoHash;

pub const MAGNET_PREFIX: &str = "magnet:?xt=urn:btih:";

const BTIH_URN: &str = "urn:btih:";

pub fn is_magnet_uri(uri: &str) -> bool {
    uri.starts_with(MAGNET_PREFIX)
}

/// A magnet link: content id plus optional name, trackers and peer hints.
#[derive(Debug, Clone, PartialEq)]
pub struct Magnet {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
    pub peers: Vec<String>,
}

impl FromStr for Magnet {
    type Err = Error;

    fn from_str(uri: &str) -> Result<Self> {
        let url = Url::parse(uri)?;
        if url.scheme() != "magnet" {
            return Err(anyhow!("not a magnet link: {}", uri));
        }

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();
        let mut peers = Vec::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    let Some(hex) = value.strip_prefix(BTIH_URN) else {
                        continue;
                    };
                    if hex.len() != 40 {
                        return Err(anyhow!("unsupported info hash encoding: {}", hex));
                    }
                    info_hash = Some(InfoHash::from_hex(hex)?);
                }
                "dn" => display_name = Some(value.into_owned()),
                "tr" => trackers.push(value.into_owned()),
                "x.pe" => peers.push(value.into_owned()),
                _ => (),
            }
        }

        let info_hash = info_hash.ok_or_else(|| anyhow!("missing info hash: {}", uri))?;
        Ok(Magnet {
            info_hash,
            display_name,
            trackers,
            peers,
        })
    }
}
