//! Source inspection.
//!
//! Classifies a source and derives the number of leading bytes that form
//! its content, then hashes exactly that range.
//!
//! Classification order matters: the SquashFS magic is checked before the
//! file type, so an image written to a block device is still measured by
//! its superblock rather than by the device capacity.

use std::fmt;
use std::fs::{File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use imgsrv_image_format::{Superblock, SUPERBLOCK_SIZE};
use sha2::{Digest, Sha512};
use tracing::debug;

use crate::blockdev::{BlockSizeQuery, PlatformBlockSize};
use crate::error::InspectError;

/// What a source turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Plain,
    Squashfs,
    BlockDevice,
    Unknown,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Plain => "plain",
            SourceKind::Squashfs => "squashfs",
            SourceKind::BlockDevice => "block-device",
            SourceKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inspected source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Path the source is re-opened from on every request.
    pub path: PathBuf,
    pub kind: SourceKind,
    /// Number of bytes from offset 0 that are hashed and served.
    pub length: u64,
    /// Lowercase hex SHA-512 of the first `length` bytes.
    pub digest: String,
}

/// File type as far as classification cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Regular { size: u64 },
    BlockDevice,
    Other,
}

impl NodeType {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let file_type = metadata.file_type();
        if file_type.is_file() {
            return NodeType::Regular {
                size: metadata.len(),
            };
        }
        if is_block_device(&file_type) {
            return NodeType::BlockDevice;
        }
        NodeType::Other
    }
}

#[cfg(unix)]
fn is_block_device(file_type: &std::fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file_type.is_block_device()
}

#[cfg(not(unix))]
fn is_block_device(_file_type: &std::fs::FileType) -> bool {
    false
}

/// Decide the kind and canonical length of a source.
///
/// `header` holds up to the first [`SUPERBLOCK_SIZE`] bytes of the source.
/// `device_size` is only consulted for block devices.
pub fn classify(
    header: &[u8],
    node: NodeType,
    device_size: impl FnOnce() -> Option<u64>,
) -> (SourceKind, u64) {
    if let Some(superblock) = Superblock::parse(header) {
        let (major, minor) = superblock.version();
        debug!(
            compression = %superblock.compression(),
            version = %format_args!("{major}.{minor}"),
            bytes_used = superblock.bytes_used,
            "Found SquashFS superblock"
        );
        return (SourceKind::Squashfs, superblock.canonical_length());
    }

    match node {
        NodeType::Regular { size } => (SourceKind::Plain, size),
        NodeType::BlockDevice => match device_size() {
            Some(size) => (SourceKind::BlockDevice, size),
            None => (SourceKind::Unknown, 0),
        },
        NodeType::Other => (SourceKind::Unknown, 0),
    }
}

/// Inspects sources using a block size capability.
#[derive(Clone)]
pub struct Inspector {
    block_size: Arc<dyn BlockSizeQuery>,
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Inspector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inspector").finish_non_exhaustive()
    }
}

impl Inspector {
    /// Create an inspector using the platform's block size query.
    pub fn new() -> Self {
        Self::with_block_size_query(PlatformBlockSize)
    }

    pub fn with_block_size_query(query: impl BlockSizeQuery + 'static) -> Self {
        Self {
            block_size: Arc::new(query),
        }
    }

    /// Open, classify and hash a source.
    ///
    /// The handle is closed before returning. Reaching end of file before
    /// `length` bytes is not an error; the digest covers what was read.
    pub fn inspect(&self, path: impl AsRef<Path>) -> Result<SourceDescriptor, InspectError> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|source| InspectError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let read_error = |source| InspectError::Read {
            path: path.to_path_buf(),
            source,
        };

        // Directories and some special files refuse reads; that only means
        // there is no superblock.
        let header = match read_header(&mut file) {
            Ok(header) => header,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Could not read header");
                Vec::new()
            }
        };

        let node = match file.metadata() {
            Ok(metadata) => NodeType::from_metadata(&metadata),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Could not stat source");
                NodeType::Other
            }
        };

        let (kind, length) = classify(&header, node, || self.block_size.query_size(&file));

        if length > 0 {
            file.seek(SeekFrom::Start(0)).map_err(read_error)?;
        }
        let digest = digest_prefix(&mut file, length).map_err(read_error)?;

        debug!(
            path = %path.display(),
            kind = %kind,
            length = length,
            digest = %digest,
            "Inspected source"
        );

        Ok(SourceDescriptor {
            path: path.to_path_buf(),
            kind,
            length,
            digest,
        })
    }
}

/// Inspect a source with the platform's block size query.
pub fn inspect(path: impl AsRef<Path>) -> Result<SourceDescriptor, InspectError> {
    Inspector::new().inspect(path)
}

/// Read up to one superblock worth of bytes, tolerating short reads.
fn read_header(reader: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(SUPERBLOCK_SIZE);
    reader
        .take(SUPERBLOCK_SIZE as u64)
        .read_to_end(&mut header)?;
    Ok(header)
}

/// Hex SHA-512 over at most `length` bytes of `reader`.
pub fn digest_prefix(reader: impl Read, length: u64) -> io::Result<String> {
    let mut hasher = Sha512::new();
    io::copy(&mut reader.take(length), &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
