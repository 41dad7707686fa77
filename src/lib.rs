//! icloud-bulk-dl: download every original photo in an iCloud library.
//!
//! Signs in to Apple ID (with optional two-factor verification), lists the
//! whole photo catalog through CloudKit, and fetches it in bulk: records
//! sharing a checksum are downloaded one by one, everything else through
//! server-prepared zip archives of up to 1000 photos that are unpacked on
//! arrival. [`App`] is the entry point for a presentation shell.

#![warn(clippy::all)]

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod context;
pub mod download;
pub mod error;
pub mod fault;
pub mod icloud;
pub mod progress;
pub mod retry;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod types;

pub use app::App;
pub use error::{Error, Result};
