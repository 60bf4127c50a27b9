//! vodcat: download HLS VOD streams and merge them into a single file.

pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod progress;
pub mod runner;
pub mod utils;
pub mod workdir;

pub use error::{Error, Result};
