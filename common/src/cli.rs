//! Command line shared by both roles.
//!
//! The holder parses exactly the same arguments as the player so it can run
//! the same output selection and pass the argv back untouched.

use clap::{ArgAction, Parser, ValueEnum};

/// Play a video on a compositor output, behind everything else.
#[derive(Parser, Debug, Clone)]
#[command(name = "vidpaper")]
#[command(about = "Video wallpaper for wlroots compositors", long_about = None)]
#[command(version)]
pub struct Args {
    /// Output to draw on: connector name, description, or '*' / 'ALL'
    #[arg(required_unless_present = "help_output")]
    pub output: Option<String>,

    /// Video, image, directory, playlist file (.m3u/.txt) or URL
    #[arg(required_unless_present = "help_output")]
    pub media: Option<String>,

    /// List the available outputs and quit
    #[arg(short = 'd', long)]
    pub help_output: bool,

    /// Fork into the background so the terminal can be closed
    #[arg(short, long)]
    pub fork: bool,

    /// Pause playback while the surface is hidden
    #[arg(short = 'p', long, conflicts_with = "auto_stop")]
    pub auto_pause: bool,

    /// Stop and hand off to the holder while the surface is hidden
    #[arg(short = 's', long)]
    pub auto_stop: bool,

    /// Seconds to show each still image in a playlist
    #[arg(short = 'n', long, value_name = "SECS")]
    pub slideshow: Option<u64>,

    /// Shell layer to place the surface on
    #[arg(short, long, value_enum)]
    pub layer: Option<SurfaceLayer>,

    /// Raw engine options, e.g. "no-audio,volume=40,shuffle"
    #[arg(short = 'o', long, value_name = "OPTIONS", allow_hyphen_values = true)]
    pub engine_options: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Playback position carried across a stop/revive handoff
    #[arg(long, hide = true, value_name = "TOKEN")]
    pub resume: Option<String>,
}

impl Args {
    /// The output selector; empty only with `--help-output`.
    pub fn output(&self) -> &str {
        self.output.as_deref().unwrap_or_default()
    }

    /// The media argument; empty only with `--help-output`.
    pub fn media(&self) -> &str {
        self.media.as_deref().unwrap_or_default()
    }

    /// Log filter implied by `-v` flags, if any were given.
    pub fn log_filter(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        }
    }
}

/// Layer-shell layer for the video surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SurfaceLayer {
    #[default]
    Background,
    Bottom,
    Top,
    Overlay,
}

impl SurfaceLayer {
    /// Parse a config-file layer name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "background" => Some(Self::Background),
            "bottom" => Some(Self::Bottom),
            "top" => Some(Self::Top),
            "overlay" => Some(Self::Overlay),
            _ => None,
        }
    }
}
