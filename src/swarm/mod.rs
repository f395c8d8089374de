pub mod local;
#[cfg(test)]
pub mod mock;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::crypto::InfoHash;
use crate::torrent::{Magnet, Metainfo};

/// What a swarm client needs to start serving one item.
#[derive(Debug, Clone)]
pub struct TorrentSpec {
    pub info_hash: InfoHash,
    pub trackers: Vec<Vec<String>>,
    /// Known for descriptor adds, fetched from the swarm for magnet adds
    pub metainfo: Option<Arc<Metainfo>>,
    pub display_name: Option<String>,
}

impl TorrentSpec {
    pub fn from_metainfo(metainfo: Arc<Metainfo>) -> Self {
        Self {
            info_hash: metainfo.info.info_hash,
            trackers: metainfo.trackers(),
            display_name: Some(metainfo.info.name().to_string()),
            metainfo: Some(metainfo),
        }
    }

    /// Merges `trackers` into the first tier, skipping urls already present in any tier.
    pub fn add_trackers(&mut self, trackers: &[String]) {
        for tracker in trackers {
            if self.trackers.iter().flatten().any(|known| known == tracker) {
                continue;
            }
            match self.trackers.first_mut() {
                Some(tier) => tier.push(tracker.clone()),
                None => self.trackers.push(vec![tracker.clone()]),
            }
        }
    }
}

impl From<&Magnet> for TorrentSpec {
    fn from(magnet: &Magnet) -> Self {
        let mut spec = Self {
            info_hash: magnet.info_hash,
            trackers: Vec::new(),
            metainfo: None,
            display_name: magnet.display_name.clone(),
        };
        spec.add_trackers(&magnet.trackers);
        spec
    }
}

/// One registered item inside a swarm client.
pub trait SwarmHandle: Send + Sync + 'static {
    fn info_hash(&self) -> InfoHash;

    /// Resolves once the descriptor is known.
    fn metadata_ready(&self) -> impl Future<Output = Result<Arc<Metainfo>>> + Send;

    fn bytes_completed(&self) -> u64;

    fn bytes_missing(&self) -> u64;

    fn download_all(&self);

    /// Re-checks the stored pieces against their hashes.
    fn verify_data(&self);

    /// Drops outstanding requests.
    fn pause(&self);

    fn is_seeding(&self) -> bool;
}

/// Peer-to-peer transport the manager drives. Piece exchange, peer discovery and the DHT all
/// live behind this boundary.
pub trait SwarmClient: Send + Sync + 'static {
    type Handle: SwarmHandle;

    /// Starts serving `spec` out of the `storage` directory.
    fn register(
        &self,
        spec: TorrentSpec,
        storage: &Path,
    ) -> impl Future<Output = Result<Arc<Self::Handle>>> + Send;

    fn unregister(&self, info_hash: &InfoHash);

    /// Bootstrap hints as `host:port`.
    fn add_peer_hints(&self, peers: &[String]);

    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::tests::single_file;

    #[test]
    fn spec_from_descriptor_keeps_tiers() {
        let mut metainfo = single_file("model.bin", b"weights", 4);
        metainfo.announce_list = vec![
            vec!["http://a/announce".to_string()],
            vec!["http://b/announce".to_string()],
        ];

        let mut spec = TorrentSpec::from_metainfo(Arc::new(metainfo));
        spec.add_trackers(&["http://b/announce".to_string(), "http://c/announce".to_string()]);

        assert_eq!(
            spec.trackers,
            vec![
                vec!["http://a/announce".to_string(), "http://c/announce".to_string()],
                vec!["http://b/announce".to_string()],
            ]
        );
        assert_eq!(spec.display_name.as_deref(), Some("model.bin"));
    }

    #[test]
    fn spec_from_magnet() {
        let magnet: Magnet = "magnet:?xt=urn:btih:c47d187067c6cf953245f128b5fde62a3b8fa3b0\
                              &tr=http%3A%2F%2Fa%2Fannounce&tr=http%3A%2F%2Fa%2Fannounce"
            .parse()
            .unwrap();

        let spec = TorrentSpec::from(&magnet);

        assert!(spec.metainfo.is_none());
        assert_eq!(spec.trackers, vec![vec!["http://a/announce".to_string()]]);
    }
}
