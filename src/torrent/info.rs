use anyhow::{Error, Result, anyhow};

use crate::bencoding::Value;
use crate::crypto::{InfoHash, SHA1_LEN, Sha1};
use crate::torrent::DownloadType;
use crate::torrent::download_type::File;

#[derive(Debug, PartialEq, Clone)]
pub struct Info {
    pub info_hash: InfoHash,
    pub piece_size: u64,
    pub pieces: Vec<Sha1>,
    pub download_type: DownloadType,
}

impl Info {
    fn build_pieces(pieces: &[u8]) -> Result<Vec<Sha1>> {
        if pieces.len() % SHA1_LEN != 0 {
            return Err(anyhow!(
                "invalid length {}. must be a multiple of {}",
                pieces.len(),
                SHA1_LEN
            ));
        }
        let mut all = Vec::with_capacity(pieces.len() / SHA1_LEN);
        for chunk in pieces.chunks_exact(SHA1_LEN) {
            let mut bytes = [0; SHA1_LEN];
            bytes.copy_from_slice(chunk);
            all.push(Sha1(bytes));
        }
        Ok(all)
    }

    pub fn name(&self) -> &str {
        self.download_type.name()
    }

    pub fn files(&self) -> Vec<File> {
        self.download_type.files()
    }

    pub fn total_pieces(&self) -> usize {
        self.pieces.len()
    }

    pub fn piece_size(&self, piece: usize) -> u64 {
        let piece_start = self.piece_offset(piece);
        let piece_end = piece_start
            .saturating_add(self.piece_size)
            .min(self.total_size());
        piece_end.saturating_sub(piece_start)
    }

    pub fn piece_offset(&self, piece: usize) -> u64 {
        self.piece_size * piece as u64
    }

    pub fn total_size(&self) -> u64 {
        match &self.download_type {
            DownloadType::SingleFile { size, .. } => *size,
            DownloadType::MultiFile { files, .. } => files
                .iter()
                .fold(0u64, |total, file| total.saturating_add(file.size)),
        }
    }

    fn checked_total_size(&self) -> Option<u64> {
        match &self.download_type {
            DownloadType::SingleFile { size, .. } => Some(*size),
            DownloadType::MultiFile { files, .. } => files
                .iter()
                .try_fold(0u64, |total, file| total.checked_add(file.size)),
        }
    }
}

impl TryFrom<Value> for Info {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        let info_hash = Sha1::from(&value);
        let piece_size: u64 = value.remove_entry("piece length")?.try_into()?;
        if piece_size == 0 {
            return Err(anyhow!("piece length must be positive"));
        }
        let pieces: Vec<u8> = value.remove_entry("pieces")?.try_into()?;
        let pieces = Info::build_pieces(&pieces)?;
        let download_type = value.try_into()?;
        let info = Info {
            info_hash,
            piece_size,
            pieces,
            download_type,
        };
        let total_size = info
            .checked_total_size()
            .ok_or_else(|| anyhow!("total length overflows"))?;
        let expected = total_size.div_ceil(piece_size);
        if expected != info.total_pieces() as u64 {
            return Err(anyhow!(
                "expected {} pieces for {} bytes, got {}",
                expected,
                total_size,
                info.total_pieces()
            ));
        }
        Ok(info)
    }
}
