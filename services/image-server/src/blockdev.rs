//! Block device size queries.
//!
//! The inspector only sees the [`BlockSizeQuery`] trait. The implementation
//! behind [`PlatformBlockSize`] is chosen at build time:
//! - Linux: `BLKGETSIZE64`
//! - macOS: `DKIOCGETBLOCKSIZE` x `DKIOCGETBLOCKCOUNT`
//! - anything else: unavailable

use std::fs::File;

/// Capability to ask a block device for its size in bytes.
pub trait BlockSizeQuery: Send + Sync {
    /// Size of the device in bytes, or None if it cannot be determined.
    fn query_size(&self, device: &File) -> Option<u64>;
}

/// The build target's native block size query.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformBlockSize;

impl BlockSizeQuery for PlatformBlockSize {
    fn query_size(&self, device: &File) -> Option<u64> {
        platform::device_size(device)
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::fs::File;
    use std::os::fd::AsRawFd;

    use tracing::debug;

    // BLKGETSIZE64 = _IOR(0x12, 114, size_t); the kernel always writes a u64.
    nix::ioctl_read!(blk_get_size64, 0x12, 114, u64);

    pub fn device_size(device: &File) -> Option<u64> {
        let mut size: u64 = 0;
        // SAFETY: the descriptor stays open for the duration of the call and
        // `size` is a valid u64 for the kernel to write.
        match unsafe { blk_get_size64(device.as_raw_fd(), &mut size) } {
            Ok(_) => Some(size),
            Err(errno) => {
                debug!(error = %errno, "BLKGETSIZE64 failed");
                None
            }
        }
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use std::fs::File;
    use std::os::fd::AsRawFd;

    use tracing::debug;

    nix::ioctl_read!(dk_get_block_size, b'd', 24, u32);
    nix::ioctl_read!(dk_get_block_count, b'd', 25, u64);

    pub fn device_size(device: &File) -> Option<u64> {
        let fd = device.as_raw_fd();
        let mut block_size: u32 = 0;
        let mut block_count: u64 = 0;
        // SAFETY: the descriptor stays open for both calls and each output
        // pointer refers to a live integer of the size the ioctl writes.
        let result = unsafe {
            dk_get_block_size(fd, &mut block_size)
                .and_then(|_| dk_get_block_count(fd, &mut block_count))
        };
        match result {
            Ok(_) => block_count.checked_mul(u64::from(block_size)),
            Err(errno) => {
                debug!(error = %errno, "DKIOCGETBLOCK* failed");
                None
            }
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod platform {
    use std::fs::File;

    pub fn device_size(_device: &File) -> Option<u64> {
        None
    }
}
