//! Stop/revive handoff between the player and the holder.
//!
//! The player captures where it was ([`ResumeToken`]), wraps its original
//! arguments in a [`HandoffEnvelope`] and replaces itself with the holder.
//! The holder later replaces itself with the player using the same envelope.

use std::fmt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Hidden flag carrying the resume token on the command line.
pub const RESUME_FLAG: &str = "--resume";

/// Playback position saved across a handoff.
///
/// The offset is kept at millisecond precision so that a token survives
/// encoding and decoding unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeToken {
    offset: Duration,
    index: usize,
}

impl ResumeToken {
    pub fn new(offset: Duration, index: usize) -> Self {
        Self {
            offset: Duration::from_millis(offset.as_millis() as u64),
            index,
        }
    }

    /// Time offset into the playlist item.
    pub fn offset(&self) -> Duration {
        self.offset
    }

    /// Playlist index of the item that was playing.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.offset.as_millis();
        write!(f, "{}.{:03} {}", millis / 1000, millis % 1000, self.index)
    }
}

impl FromStr for ResumeToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidToken(s.to_string());

        let mut parts = s.split_whitespace();
        let (Some(time), Some(index), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };

        let seconds: f64 = time.parse().map_err(|_| invalid())?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(invalid());
        }
        let index: usize = index.parse().map_err(|_| invalid())?;

        let millis = (seconds * 1000.0).round() as u64;
        Ok(Self::new(Duration::from_millis(millis), index))
    }
}

/// Arguments passed across a process replacement.
///
/// `args` never contains a resume flag; the token is always appended last,
/// so tokens from earlier handoffs cannot nest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffEnvelope {
    args: Vec<String>,
    token: Option<ResumeToken>,
}

impl HandoffEnvelope {
    /// Envelope for a fresh stop: `args` are stripped of any earlier token.
    pub fn new(args: Vec<String>, token: ResumeToken) -> Self {
        Self {
            args: strip_resume(&args),
            token: Some(token),
        }
    }

    /// Parse arguments as received (without the program name).
    ///
    /// A malformed token is an error; a missing one is not.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut raw_token = None;
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == RESUME_FLAG {
                raw_token = iter.next().cloned();
            } else if let Some(value) = arg.strip_prefix("--resume=") {
                raw_token = Some(value.to_string());
            }
        }

        let token = raw_token.map(|raw| raw.parse()).transpose()?;
        Ok(Self {
            args: strip_resume(args),
            token,
        })
    }

    pub fn token(&self) -> Option<ResumeToken> {
        self.token
    }

    /// Arguments to hand to the replacement process.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(token) = self.token {
            args.push(RESUME_FLAG.to_string());
            args.push(token.to_string());
        }
        args
    }
}

/// Remove every `--resume X` / `--resume=X` occurrence.
fn strip_resume(args: &[String]) -> Vec<String> {
    let mut kept = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == RESUME_FLAG {
            iter.next();
        } else if !arg.starts_with("--resume=") {
            kept.push(arg.clone());
        }
    }
    kept
}

/// Transfers control of the current process to another program.
pub trait ProcessReplacer: Send + Sync {
    /// Replace the running image. Only returns on failure.
    fn replace(&self, program: &Path, args: &[String]) -> Error;
}

/// exec(2)-based replacement: pid, open descriptors and environment survive.
#[derive(Debug, Default)]
pub struct ExecReplacer;

impl ProcessReplacer for ExecReplacer {
    fn replace(&self, program: &Path, args: &[String]) -> Error {
        log::info!("Replacing process with {} {:?}", program.display(), args);
        let source = std::process::Command::new(program).args(args).exec();
        Error::Exec {
            program: program.to_path_buf(),
            source,
        }
    }
}

/// Find a sibling binary of the running executable, then fall back to `PATH`.
pub fn locate_binary(name: &str, override_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path.to_path_buf());
    }

    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let sibling = dir.join(name);
        if sibling.is_file() {
            return Ok(sibling);
        }
    }

    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(name))
                .find(|candidate| candidate.is_file())
        })
        .ok_or_else(|| Error::BinaryNotFound(name.to_string()))
}
