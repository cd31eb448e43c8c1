//! offtune - offline collection cache and favourites sync for Subsonic servers
//!
//! The [`offline`] module holds the engine. [`subsonic`] and [`cache`] are the
//! concrete collaborators the command line tool plugs into it.

pub mod cache;
pub mod config;
pub mod error;
pub mod offline;
pub mod subsonic;
pub mod utils;

pub use error::{Error, Result};
