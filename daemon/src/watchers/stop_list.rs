use common::census::ProcessCensus;
use common::watchlist::WatchList;

use super::{CensusPoll, WatchContext, interval};

/// Stop playback the first time a program from `list` is seen running.
pub async fn run(mut ctx: WatchContext, list: WatchList, census: Box<dyn ProcessCensus>) {
    log::info!("Watching {} program(s) from the stop list", list.len());
    let mut census = CensusPoll::new(census, &list);
    let mut ticks = interval(ctx.timing.process_poll);

    while ctx.tick(&mut ticks).await {
        if let Some(name) = census.find_running().await {
            ctx.request_stop(format!("'{}' is running", name));
            return;
        }
    }

    log::debug!("Stop-list watcher stopped");
}
