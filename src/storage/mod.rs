pub mod verify;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::fs;

use crate::crypto::InfoHash;

const DESCRIPTOR_FILE: &str = "torrent";

/// On-disk layout: `<data>/<hex>` holds promoted items, `<tmp>/<hex>` holds items still
/// downloading. Each item directory carries its descriptor in a file named `torrent`.
#[derive(Debug, Clone)]
pub struct Layout {
    data_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl Layout {
    pub fn new(data_dir: PathBuf, tmp_dir: PathBuf) -> Self {
        Self { data_dir, tmp_dir }
    }

    pub async fn create_dirs(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.tmp_dir] {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("unable to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn data_path(&self, info_hash: &InfoHash) -> PathBuf {
        self.data_dir.join(info_hash.hex())
    }

    pub fn tmp_path(&self, info_hash: &InfoHash) -> PathBuf {
        self.tmp_dir.join(info_hash.hex())
    }

    pub fn descriptor_path(dir: &Path) -> PathBuf {
        dir.join(DESCRIPTOR_FILE)
    }

    /// Publishes a completed temporary directory under the data root by linking
    /// `<data>/<hex>` to it. Returns the link path.
    ///
    /// A link already pointing at the temporary directory is kept and a stale link is replaced.
    /// A real directory in the way is moved aside to `<hex>.invalid-<unix-seconds>`, it is never
    /// repaired or deleted.
    pub async fn promote(&self, info_hash: &InfoHash) -> Result<PathBuf> {
        let link = self.data_path(info_hash);
        let target = self.link_target(info_hash);
        match fs::symlink_metadata(&link).await {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                if fs::read_link(&link).await? == target {
                    return Ok(link);
                }
                warn!("replacing stale link {}", link.display());
                fs::remove_file(&link).await?;
            }
            Ok(_) => {
                let aside = self.data_dir.join(format!(
                    "{}.invalid-{}",
                    info_hash.hex(),
                    unix_seconds()
                ));
                warn!("moving {} aside to {}", link.display(), aside.display());
                fs::rename(&link, &aside).await?;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => (),
            Err(err) => return Err(err.into()),
        }
        symlink_dir(&target, &link)
            .await
            .with_context(|| format!("unable to link {}", link.display()))?;
        info!("promoted {} to {}", info_hash, link.display());
        Ok(link)
    }

    /// Relative when the temporary root lives under the data root, so the pair can be moved
    /// together.
    fn link_target(&self, info_hash: &InfoHash) -> PathBuf {
        let tmp_path = self.tmp_path(info_hash);
        match tmp_path.strip_prefix(&self.data_dir) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => tmp_path,
        }
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[cfg(unix)]
async fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(windows)]
async fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    fs::symlink_dir(target, link).await
}
