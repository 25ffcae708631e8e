//! Common types and utilities for vidpaper.
//!
//! This crate holds everything the active player (`vidpaper`) and the dormant
//! holder (`vidpaper-holder`) have to agree on:
//!
//! - [`cli::Args`]: the command line both roles parse
//! - [`config::Config`]: `config.toml`, so both roles use the same layer and
//!   cadences
//! - [`outputs`]: output identity resolution and selection
//! - [`watchlist::WatchList`]: process names loaded from the user's config
//! - [`handoff`]: the resume token and the argv envelope passed across a
//!   process replacement
//! - [`census`]: asking whether a named program is running
//!
//! # Handoff wire format
//!
//! When the player stops it replaces itself with the holder, passing its
//! original arguments plus a hidden `--resume "<seconds> <index>"` flag.
//! The holder passes the same arguments back when it revives the player.
//!
//! ```
//! use common::handoff::{HandoffEnvelope, ResumeToken};
//! use std::time::Duration;
//!
//! let token = ResumeToken::new(Duration::from_millis(83_250), 2);
//! let envelope = HandoffEnvelope::new(vec!["DP-1".into(), "/videos".into()], token);
//!
//! let args = envelope.to_args();
//! assert_eq!(args[2], "--resume");
//! assert_eq!(args[3], "83.250 2");
//! assert_eq!(HandoffEnvelope::from_args(&args).unwrap(), envelope);
//! ```

use thiserror::Error;

pub mod census;
pub mod cli;
pub mod config;
pub mod handoff;
pub mod outputs;
pub mod paths;
pub mod watchlist;

/// Binary name of the active role.
pub const PLAYER_BINARY: &str = "vidpaper";

/// Binary name of the dormant role.
pub const HOLDER_BINARY: &str = "vidpaper-holder";

/// Error types shared between the player and the holder.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid resume token '{0}' (expected \"<seconds> <index>\")")]
    InvalidToken(String),

    #[error("Failed to read watch list {}: {source}", path.display())]
    WatchList {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to replace process with {}: {source}", program.display())]
    Exec {
        program: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Could not locate binary '{0}'")]
    BinaryNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
