//! Local disk access for the cache
//!
//! The cache never touches `std::fs` directly: file size, modification
//! time and removal all go through a [`DiskBackend`], so tests can swap in
//! an in-memory backend with fully controlled timestamps.
//!
//! - **fs backend** (all platforms): `std::fs` plus `walkdir` for scans
//! - **mock backend** (tests only): `HashMap` storage

pub mod backend;
pub mod fs_backend;

pub use self::backend::DiskBackend;
pub use self::fs_backend::FsBackend;

#[cfg(test)]
pub(crate) mod mock_backend;
