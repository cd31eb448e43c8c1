//! Utility functions

pub mod escape;
mod sanitize;

pub use escape::{escape, split_unescaped, unescape};
pub use sanitize::sanitize_filename;
