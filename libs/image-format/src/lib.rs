//! SquashFS superblock decoding.
//!
//! Only the fixed 96-byte superblock at offset 0 is understood. It is enough
//! to recognise an image and to learn how many leading bytes it occupies.
//!
//! Wire format (all fields little-endian):
//! - 4 bytes magic (`hsqs`)
//! - 5 x u32: inode count, mkfs time, block size, fragment count
//! - 6 x u16: compression, block log, flags, id count, version major/minor
//! - 8 x u64: root inode, bytes used, then six table offsets

/// SquashFS magic number (`hsqs` read as a little-endian u32).
pub const SQUASHFS_MAGIC: u32 = 0x7371_7369;

/// Size of the on-disk superblock.
pub const SUPERBLOCK_SIZE: usize = 96;

/// Bytes needed to recognise an image: magic through `bytes_used`.
pub const MIN_HEADER_SIZE: usize = 48;

/// Images are padded to this boundary by mksquashfs.
pub const IMAGE_ALIGNMENT: u64 = 4096;

/// Compressor recorded in the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Lzma,
    Lzo,
    Xz,
    Lz4,
    Zstd,
    Unknown(u16),
}

impl Compression {
    pub fn from_id(id: u16) -> Self {
        match id {
            1 => Self::Gzip,
            2 => Self::Lzma,
            3 => Self::Lzo,
            4 => Self::Xz,
            5 => Self::Lz4,
            6 => Self::Zstd,
            other => Self::Unknown(other),
        }
    }

    pub fn id(self) -> u16 {
        match self {
            Self::Gzip => 1,
            Self::Lzma => 2,
            Self::Lzo => 3,
            Self::Xz => 4,
            Self::Lz4 => 5,
            Self::Zstd => 6,
            Self::Unknown(other) => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Lzma => "lzma",
            Self::Lzo => "lzo",
            Self::Xz => "xz",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded SquashFS superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub magic: u32,
    pub inode_count: u32,
    pub mkfs_time: u32,
    pub block_size: u32,
    pub fragment_count: u32,
    pub compression: u16,
    pub block_log: u16,
    pub flags: u16,
    pub id_count: u16,
    pub version_major: u16,
    pub version_minor: u16,
    pub root_inode: u64,
    /// Number of bytes of the image actually in use.
    pub bytes_used: u64,
    pub id_table_start: u64,
    pub xattr_id_table_start: u64,
    pub inode_table_start: u64,
    pub directory_table_start: u64,
    pub fragment_table_start: u64,
    pub export_table_start: u64,
}

impl Default for Superblock {
    fn default() -> Self {
        Self {
            magic: SQUASHFS_MAGIC,
            inode_count: 0,
            mkfs_time: 0,
            block_size: 128 * 1024,
            fragment_count: 0,
            compression: Compression::Gzip.id(),
            block_log: 17,
            flags: 0,
            id_count: 0,
            version_major: 4,
            version_minor: 0,
            root_inode: 0,
            bytes_used: 0,
            id_table_start: 0,
            xattr_id_table_start: u64::MAX,
            inode_table_start: 0,
            directory_table_start: 0,
            fragment_table_start: 0,
            export_table_start: u64::MAX,
        }
    }
}

impl Superblock {
    /// Parse a superblock from the start of an image.
    ///
    /// Returns None if fewer than [`MIN_HEADER_SIZE`] bytes are available
    /// or the magic does not match. Table offsets missing from a header
    /// shorter than [`SUPERBLOCK_SIZE`] decode as zero.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < MIN_HEADER_SIZE {
            return None;
        }

        let mut raw = [0u8; SUPERBLOCK_SIZE];
        let available = data.len().min(SUPERBLOCK_SIZE);
        raw[..available].copy_from_slice(&data[..available]);

        let mut cursor = Cursor {
            data: &raw,
            pos: 0,
        };
        let magic = cursor.u32();
        if magic != SQUASHFS_MAGIC {
            return None;
        }

        Some(Self {
            magic,
            inode_count: cursor.u32(),
            mkfs_time: cursor.u32(),
            block_size: cursor.u32(),
            fragment_count: cursor.u32(),
            compression: cursor.u16(),
            block_log: cursor.u16(),
            flags: cursor.u16(),
            id_count: cursor.u16(),
            version_major: cursor.u16(),
            version_minor: cursor.u16(),
            root_inode: cursor.u64(),
            bytes_used: cursor.u64(),
            id_table_start: cursor.u64(),
            xattr_id_table_start: cursor.u64(),
            inode_table_start: cursor.u64(),
            directory_table_start: cursor.u64(),
            fragment_table_start: cursor.u64(),
            export_table_start: cursor.u64(),
        })
    }

    /// Encode the superblock into its on-disk representation.
    pub fn encode(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        let mut pos = 0;
        let mut put = |bytes: &[u8]| {
            buf[pos..pos + bytes.len()].copy_from_slice(bytes);
            pos += bytes.len();
        };

        put(&self.magic.to_le_bytes());
        put(&self.inode_count.to_le_bytes());
        put(&self.mkfs_time.to_le_bytes());
        put(&self.block_size.to_le_bytes());
        put(&self.fragment_count.to_le_bytes());
        put(&self.compression.to_le_bytes());
        put(&self.block_log.to_le_bytes());
        put(&self.flags.to_le_bytes());
        put(&self.id_count.to_le_bytes());
        put(&self.version_major.to_le_bytes());
        put(&self.version_minor.to_le_bytes());
        put(&self.root_inode.to_le_bytes());
        put(&self.bytes_used.to_le_bytes());
        put(&self.id_table_start.to_le_bytes());
        put(&self.xattr_id_table_start.to_le_bytes());
        put(&self.inode_table_start.to_le_bytes());
        put(&self.directory_table_start.to_le_bytes());
        put(&self.fragment_table_start.to_le_bytes());
        put(&self.export_table_start.to_le_bytes());

        buf
    }

    /// Number of leading bytes that make up the image, padding included.
    pub fn canonical_length(&self) -> u64 {
        align_up(self.bytes_used, IMAGE_ALIGNMENT)
    }

    pub fn compression(&self) -> Compression {
        Compression::from_id(self.compression)
    }

    /// Format version as (major, minor).
    pub fn version(&self) -> (u16, u16) {
        (self.version_major, self.version_minor)
    }
}

/// Round `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two. Saturates at the largest aligned
/// value instead of wrapping.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    let mask = alignment - 1;
    match value.checked_add(mask) {
        Some(v) => v & !mask,
        None => u64::MAX & !mask,
    }
}

/// Little-endian reader over a slice already checked for length.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }
}
