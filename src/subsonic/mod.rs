//! Subsonic API client module

pub mod auth;
mod catalog;
pub mod client;
pub mod models;

pub use client::{ApiError, SubsonicClient};
pub use models::*;
