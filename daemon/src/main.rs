mod engine;
mod error;
mod gpu;
mod handoff;
mod macros;
mod playback;
mod playlist;
mod wayland;
mod watchers;

use anyhow::{Context, Result};
use clap::Parser;
use common::census::{ProcessCensus, SysinfoCensus};
use common::cli::Args;
use common::config::{Config, ConfigFile};
use common::handoff::{ExecReplacer, HandoffEnvelope};
use common::outputs::Selector;
use common::watchlist::WatchList;
use std::fs::OpenOptions;
use std::future::Future;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::signal::unix::{SignalKind, signal};

use engine::{EngineOptions, FrameSource, GstEngine, MediaEngine};
use handoff::HandoffController;
use playback::PlaybackControl;
use playlist::Playlist;
use wayland::{DisplayOptions, DisplayThread};
use watchers::{Lifecycle, VisibilityAction, WatcherPlan, WatcherSupervisor, WatcherTiming};

/// Wallpaper programs that may cover our surface
const OTHER_WALLPAPERS: [&str; 4] = ["swaybg", "glpaper", "hyprpaper", "wpaperd"];

/// Why the main loop ended
enum Outcome {
    Handoff(String),
    Exit,
    DisplayClosed(Result<()>),
}

fn main() -> Result<()> {
    let args = Args::parse();
    let loaded = Config::load();

    let filter = args
        .log_filter()
        .map(str::to_string)
        .or_else(|| {
            let file = loaded.as_ref().ok()?;
            file.log_level().map(str::to_string)
        })
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let config = ConfigFile::settle(loaded);

    if args.help_output {
        for line in wayland::list_outputs().context("Failed to list outputs")? {
            println!("{}", line);
        }
        return Ok(());
    }

    if should_detach(&args) {
        detach()?;
    }

    log::info!("Starting vidpaper v{}", env!("CARGO_PKG_VERSION"));

    if let Some(name) = other_wallpaper_running(&mut SysinfoCensus::new()) {
        log::warn!("{} is running. This may keep vidpaper from being seen", name);
    }

    let wait = config.watchers.shutdown_wait();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    block_on_bounded(runtime, wait, run(args, config))
}

/// Drive `future` to completion, then give leftover tasks at most `wait`.
///
/// A display thread stuck inside a compositor call must not keep the
/// process alive after the main loop is done.
fn block_on_bounded<F: Future>(runtime: Runtime, wait: Duration, future: F) -> F::Output {
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(wait);
    output
}

/// A revived player is already detached.
fn should_detach(args: &Args) -> bool {
    args.fork && args.resume.is_none()
}

/// Fork into the background. The parent exits, the child loses its stdio.
fn detach() -> Result<()> {
    match unsafe { libc::fork() } {
        -1 => Err(std::io::Error::last_os_error()).context("Failed to fork"),
        0 => {
            let null = OpenOptions::new()
                .read(true)
                .write(true)
                .open("/dev/null")
                .context("Failed to open /dev/null")?;
            for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
                if unsafe { libc::dup2(null.as_raw_fd(), fd) } == -1 {
                    return Err(std::io::Error::last_os_error())
                        .context("Failed to detach from the terminal");
                }
            }
            Ok(())
        }
        _ => std::process::exit(0),
    }
}

fn other_wallpaper_running(census: &mut dyn ProcessCensus) -> Option<String> {
    let names: Vec<String> = OTHER_WALLPAPERS.iter().map(|name| name.to_string()).collect();
    census.find_running(&names)
}

async fn run(args: Args, config: Config) -> Result<()> {
    // Everything after the program name, kept for the handoff
    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let start = match HandoffEnvelope::from_args(&raw_args) {
        Ok(envelope) => envelope.token(),
        Err(e) => {
            log::warn!("{}, starting from the beginning", e);
            None
        }
    };

    let options = EngineOptions::parse([
        config.engine.options.as_str(),
        args.engine_options.as_deref().unwrap_or_default(),
    ]);
    let playlist = Playlist::from_media(args.media(), &config.engine.extensions, options.shuffle)?;
    log::info!("Playlist loaded: {} item(s)", playlist.len());

    let slideshow = args.slideshow.filter(|secs| *secs > 0).map(Duration::from_secs);
    let engine = Arc::new(GstEngine::new(playlist, options, slideshow, start)?);
    let control = Arc::new(PlaybackControl::new());

    let display_options = DisplayOptions {
        selector: Selector::parse(args.output()),
        layer: config.surface_layer(args.layer),
    };
    let frames: Arc<dyn FrameSource> = engine.clone();
    let mut display = DisplayThread::spawn(display_options, frames, Arc::clone(&control))
        .await
        .context("Failed to set up the display")?;

    let media: Arc<dyn MediaEngine> = engine.clone();
    let (mut supervisor, mut lifecycle) = WatcherSupervisor::new(
        Arc::clone(&control),
        Arc::clone(&media),
        WatcherTiming::from(&config.watchers),
    );

    let visibility = if args.auto_stop {
        Some(VisibilityAction::Stop)
    } else if args.auto_pause {
        Some(VisibilityAction::Pause)
    } else {
        None
    };
    let plan = WatcherPlan {
        pause_list: WatchList::load_or_empty(common::paths::pause_list_path().as_deref()),
        stop_list: WatchList::load_or_empty(common::paths::stop_list_path().as_deref()),
        visibility,
    };
    supervisor.start(plan, || Box::new(SysinfoCensus::new()));

    let controller = HandoffController::new(
        Arc::clone(&media),
        Arc::clone(&control),
        raw_args,
        Box::new(ExecReplacer),
    )
    .with_holder(config.engine.holder_binary.as_deref().map(PathBuf::from))
    .with_shutdown_wait(config.watchers.shutdown_wait());

    let mut sigusr1 =
        signal(SignalKind::user_defined1()).context("Failed to set up SIGUSR1 handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to set up SIGINT handler")?;
    let mut sigquit = signal(SignalKind::quit()).context("Failed to set up SIGQUIT handler")?;

    let outcome = loop {
        tokio::select! {
            message = lifecycle.recv() => match message {
                Some(Lifecycle::Stop(reason)) => break Outcome::Handoff(reason),
                Some(Lifecycle::Exit) | None => break Outcome::Exit,
            },
            result = display.finished() => break Outcome::DisplayClosed(result),
            _ = sigusr1.recv() => {
                log::info!("Received SIGUSR1, toggling pause");
                log_and_continue!(media.toggle_pause(), "toggle pause");
            }
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM, shutting down...");
                break Outcome::Exit;
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT, shutting down...");
                break Outcome::Exit;
            }
            _ = sigquit.recv() => {
                log::info!("Received SIGQUIT, shutting down...");
                break Outcome::Exit;
            }
        }
    };

    match outcome {
        Outcome::Handoff(reason) => {
            log::info!("Stopping ({}), handing off to {}", reason, common::HOLDER_BINARY);
            let Err(e) = controller.stop_and_revive(supervisor, display).await;
            Err(e.context("Handoff failed"))
        }
        Outcome::Exit => {
            controller.teardown(supervisor, Some(display)).await;
            log::info!("vidpaper shutting down");
            Ok(())
        }
        Outcome::DisplayClosed(result) => {
            controller.teardown(supervisor, None).await;
            result.context("Display session ended")
        }
    }
}
