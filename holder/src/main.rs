mod buffer;
mod gate;
mod session;

use anyhow::{Context, Result};
use clap::Parser;
use common::census::SysinfoCensus;
use common::cli::Args;
use common::config::{Config, ConfigFile};
use common::handoff::{ExecReplacer, HandoffEnvelope, ProcessReplacer, locate_binary};
use common::watchlist::WatchList;

use session::HolderOptions;

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

    log::info!("Starting vidpaper-holder v{}", env!("CARGO_PKG_VERSION"));
    let config = ConfigFile::settle(loaded);

    // Passed back untouched, resume token included
    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    match HandoffEnvelope::from_args(&raw_args).map(|envelope| envelope.token()) {
        Ok(Some(token)) => log::info!(
            "Holding item {} at {:.3} s",
            token.index(),
            token.offset().as_secs_f64()
        ),
        Ok(None) => log::warn!("Started without a resume token, playback will start over"),
        Err(e) => log::warn!("{}, playback will start over", e),
    }

    let stop_list = WatchList::load_or_empty(common::paths::stop_list_path().as_deref());
    let options = HolderOptions::new(&args, &config);
    log::debug!("Holder options: {:?}", options);

    session::wait_for_revival(options, stop_list, Box::new(SysinfoCensus::new()))?;

    let player = locate_binary(common::PLAYER_BINARY, None)
        .with_context(|| format!("Cannot revive {}", common::PLAYER_BINARY))?;
    Err(ExecReplacer.replace(&player, &raw_args).into())
}
