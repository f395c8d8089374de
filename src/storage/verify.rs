use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, bail};
use bit_set::BitSet;
use log::debug;
use memmap2::Mmap;
use sha1::Digest;

use crate::crypto::Sha1;
use crate::torrent::{FileEntry, Info};

/// Checks that `root` holds every file of `info` with the right length and that every piece
/// hashes to its expected value. Pieces span file boundaries.
pub fn verify(info: &Info, root: &Path) -> Result<()> {
    let files = MappedFiles::open(info, root)?;
    if let Some(file) = files.entries.iter().find(|file| !file.content.is_present()) {
        bail!("file {} has wrong length", file.entry.path.display());
    }
    for (piece, expected) in info.pieces.iter().enumerate() {
        if files.piece_hash(info, piece).as_ref() != Some(expected) {
            bail!("hash mismatch at piece {}", piece);
        }
    }
    Ok(())
}

/// Set of pieces of a possibly incomplete directory that match their hashes.
///
/// Missing files and files of the wrong length count as absent.
pub fn piece_states(info: &Info, root: &Path) -> BitSet {
    let mut valid = BitSet::with_capacity(info.total_pieces());
    let files = match MappedFiles::open(info, root) {
        Ok(files) => files,
        Err(err) => {
            debug!("unable to read {}: {:#}", root.display(), err);
            return valid;
        }
    };
    for (piece, expected) in info.pieces.iter().enumerate() {
        if files.piece_hash(info, piece).as_ref() == Some(expected) {
            valid.insert(piece);
        }
    }
    valid
}

enum Content {
    Absent,
    Empty,
    Mapped(Mmap),
}

impl Content {
    fn is_present(&self) -> bool {
        !matches!(self, Content::Absent)
    }

    fn bytes(&self) -> Option<&[u8]> {
        match self {
            Content::Absent => None,
            Content::Empty => Some(&[]),
            Content::Mapped(mmap) => Some(mmap),
        }
    }
}

struct MappedFile {
    entry: FileEntry,
    /// Offset of the first byte within the concatenated content
    offset: u64,
    content: Content,
}

struct MappedFiles {
    entries: Vec<MappedFile>,
}

impl MappedFiles {
    fn open(info: &Info, root: &Path) -> Result<Self> {
        let mut offset = 0;
        let mut entries = Vec::new();
        for entry in info.files() {
            let content = map_file(&root.join(&entry.path), entry.size)?;
            let size = entry.size;
            entries.push(MappedFile {
                entry,
                offset,
                content,
            });
            offset = offset.saturating_add(size);
        }
        Ok(Self { entries })
    }

    /// Hash of one piece, `None` if any file it covers is absent.
    fn piece_hash(&self, info: &Info, piece: usize) -> Option<Sha1> {
        let start = info.piece_offset(piece);
        let end = start.saturating_add(info.piece_size(piece));
        let mut hasher = sha1::Sha1::new();
        for file in &self.entries {
            let file_end = file.offset.saturating_add(file.entry.size);
            if file_end <= start || file.offset >= end {
                continue;
            }
            let bytes = file.content.bytes()?;
            let from = start.saturating_sub(file.offset) as usize;
            let to = (end.min(file_end) - file.offset) as usize;
            hasher.update(&bytes[from..to]);
        }
        Some(Sha1(hasher.finalize().into()))
    }
}

fn map_file(path: &Path, expected: u64) -> Result<Content> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Content::Absent),
        Err(err) => return Err(err).with_context(|| format!("unable to open {}", path.display())),
    };
    let size = file.metadata()?.len();
    if size != expected {
        return Ok(Content::Absent);
    }
    if size == 0 {
        return Ok(Content::Empty);
    }
    // Safety: nothing else truncates the item's files while they are verified
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("unable to map {}", path.display()))?;
    Ok(Content::Mapped(mmap))
}
