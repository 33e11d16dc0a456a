//! I/O operations module
//!
//! Transfer buffers, test file handles and the storage mount seam.

pub mod buffer;
pub mod file;
pub mod mount;

pub use buffer::{Alignment, AllocationError, TransferBuffer};
pub use file::{ChunkStatus, ChunkStream, FileLifecycle, OpenMode, TestFile};
pub use mount::{DirectoryMount, MountError, MountGuard, MountOptions, MountService, Volume};
