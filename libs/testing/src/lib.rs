//! Test fixtures for imgsrv crates.
//!
//! Builds on-disk sources (plain files and crafted SquashFS images) inside a
//! temporary directory that is removed when the fixture is dropped.

use std::fs;
use std::io;
use std::path::PathBuf;

use imgsrv_image_format::{Superblock, SUPERBLOCK_SIZE};
use tempfile::TempDir;

/// A crafted SquashFS image.
///
/// The image consists of a valid superblock followed by deterministic
/// filler up to `bytes_used`, then `padding` zero bytes and finally
/// `trailing` bytes of garbage that do not belong to the image.
#[derive(Debug, Clone)]
pub struct SquashfsImage {
    pub bytes_used: u64,
    pub padding: usize,
    pub trailing: Vec<u8>,
}

impl SquashfsImage {
    pub fn new(bytes_used: u64) -> Self {
        Self {
            bytes_used,
            padding: 0,
            trailing: Vec::new(),
        }
    }

    /// Pad with zeros up to the next 4 KiB boundary.
    pub fn padded(mut self) -> Self {
        let aligned = imgsrv_image_format::align_up(self.bytes_used, 4096);
        self.padding = (aligned - self.bytes_used) as usize;
        self
    }

    pub fn with_trailing(mut self, trailing: impl Into<Vec<u8>>) -> Self {
        self.trailing = trailing.into();
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let superblock = Superblock {
            bytes_used: self.bytes_used,
            ..Default::default()
        };

        let used = (self.bytes_used as usize).max(SUPERBLOCK_SIZE);
        let mut data = Vec::with_capacity(used + self.padding + self.trailing.len());
        data.extend_from_slice(&superblock.encode());
        data.extend(filler(used - SUPERBLOCK_SIZE));
        data.resize(data.len() + self.padding, 0);
        data.extend_from_slice(&self.trailing);
        data
    }
}

/// Deterministic non-zero bytes.
pub fn filler(len: usize) -> impl Iterator<Item = u8> {
    (0..len).map(|i| (i % 251) as u8 + 1)
}

/// Temporary directory holding test sources.
pub struct SourceDir {
    dir: TempDir,
}

impl SourceDir {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    /// Write `contents` to `name` and return the full path.
    pub fn write(&self, name: &str, contents: &[u8]) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn write_squashfs(&self, name: &str, image: &SquashfsImage) -> io::Result<PathBuf> {
        self.write(name, &image.to_bytes())
    }

    /// Create an empty subdirectory, which inspects as an unknown source.
    pub fn mkdir(&self, name: &str) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::create_dir(&path)?;
        Ok(path)
    }

    /// A path inside the directory that does not exist.
    pub fn missing(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}
