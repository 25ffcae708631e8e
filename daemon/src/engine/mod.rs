//! Media engine
//!
//! The rest of the daemon sees the engine through two traits:
//!
//! - [`MediaEngine`]: the thread-safe command API used by the watchers and
//!   the handoff controller (pause, resume, position, playlist advance, events)
//! - [`FrameSource`]: non-blocking access to the newest decoded frame for the
//!   render pump, plus the "new frame" wakeup
//!
//! [`GstEngine`] implements both on top of GStreamer's `playbin` with an
//! `appsink` delivering RGBA frames.

pub mod frames;
mod pipeline;
pub mod options;

use anyhow::Result;
use common::handoff::ResumeToken;
use std::sync::Arc;
use std::time::Duration;

pub use frames::{FrameStore, VideoFrame};
pub use pipeline::GstEngine;
pub use options::EngineOptions;

use crate::playlist::Playlist;

/// Asynchronous events reported by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The user paused playback through the engine
    Paused,
    /// The user resumed playback through the engine
    Unpaused,
    /// The current item finished (or its slideshow time ran out)
    EndOfStream,
    /// The current item failed; playback can continue with the next one
    Error(String),
    /// The engine cannot continue
    Shutdown,
}

/// Result of moving to the next playlist item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Continue,
    /// The playlist ended and looping is off
    Finished,
}

pub trait MediaEngine: Send + Sync {
    /// Pause on behalf of a watcher. Emits no event.
    fn pause(&self) -> Result<()>;

    /// Resume on behalf of a watcher. Emits no event.
    fn resume(&self) -> Result<()>;

    /// Direct user control. Emits [`EngineEvent::Paused`] or
    /// [`EngineEvent::Unpaused`].
    fn toggle_pause(&self) -> Result<()>;

    fn is_paused(&self) -> bool;

    /// Where playback is now, as a resume token
    fn position(&self) -> ResumeToken;

    /// Move past the current item, honouring the loop options
    fn advance(&self) -> Result<Advance>;

    /// Drain events that happened since the last call
    fn poll_events(&self) -> Vec<EngineEvent>;

    /// Stop playback and release the pipeline. Idempotent.
    fn shutdown(&self);
}

pub trait FrameSource: Send + Sync {
    /// Newest decoded frame, never blocks on decoding
    fn latest_frame(&self) -> Option<Arc<VideoFrame>>;

    /// Called from the streaming thread whenever a frame arrives
    fn set_frame_notifier(&self, notifier: Box<dyn Fn() + Send + Sync>);

    /// Stop producing frames for good. Must be idempotent.
    fn close(&self);
}

/// Apply a one-shot start position to the playlist.
///
/// The token is consumed: later loads start from the beginning of their item.
/// Returns the offset to seek to, if any.
pub fn take_start_position(
    playlist: &mut Playlist,
    start: &mut Option<ResumeToken>,
) -> Option<Duration> {
    let token = start.take()?;

    if !playlist.select(token.index()) {
        log::warn!(
            "Resume index {} is outside the playlist ({} entries), starting from the top",
            token.index(),
            playlist.len()
        );
        return None;
    }

    log::info!(
        "Resuming entry {} at {:.3}s",
        token.index(),
        token.offset().as_secs_f64()
    );
    Some(token.offset()).filter(|offset| !offset.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::PlaylistEntry;

    fn playlist() -> Playlist {
        Playlist::from_entries(
            vec![
                PlaylistEntry::File("a.mp4".into()),
                PlaylistEntry::File("b.mp4".into()),
                PlaylistEntry::File("c.mp4".into()),
            ],
            false,
        )
    }

    #[test]
    fn test_start_position_is_taken_once() {
        let mut playlist = playlist();
        let mut start = Some(ResumeToken::new(Duration::from_millis(42_500), 1));

        let offset = take_start_position(&mut playlist, &mut start);
        assert_eq!(offset, Some(Duration::from_millis(42_500)));
        assert_eq!(playlist.current_index(), 1);
        assert!(start.is_none());

        playlist.next();
        assert_eq!(take_start_position(&mut playlist, &mut start), None);
        assert_eq!(playlist.current_index(), 2);
    }

    #[test]
    fn test_out_of_range_start_is_ignored() {
        let mut playlist = playlist();
        let mut start = Some(ResumeToken::new(Duration::from_secs(3), 9));

        assert_eq!(take_start_position(&mut playlist, &mut start), None);
        assert_eq!(playlist.current_index(), 0);
        assert!(start.is_none());
    }

    #[test]
    fn test_zero_offset_selects_without_seeking() {
        let mut playlist = playlist();
        let mut start = Some(ResumeToken::new(Duration::ZERO, 2));

        assert_eq!(take_start_position(&mut playlist, &mut start), None);
        assert_eq!(playlist.current_index(), 2);
    }
}
