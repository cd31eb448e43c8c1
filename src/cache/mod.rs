//! Local song cache implementing the download engine

mod engine;
mod index;
mod storage;

pub use engine::LocalDownloadEngine;
pub use index::{CacheIndex, IndexEntry};
pub use storage::CacheStorage;
