//! imgsrv image server.
//!
//! Serves plain files, SquashFS images and block devices read-only over
//! HTTP, addressed by the SHA-512 of their content.

pub mod api;
pub mod blockdev;
pub mod config;
pub mod error;
pub mod inspect;
pub mod logging;
pub mod registry;
pub mod state;

pub use blockdev::{BlockSizeQuery, PlatformBlockSize};
pub use error::{InspectError, StartupError};
pub use inspect::{inspect, Inspector, SourceDescriptor, SourceKind};
pub use registry::{route_for, Registration, Registry};
pub use state::AppState;
