use common::Error;
use common::watchlist::WatchList;
use std::fs;

#[test]
fn test_lists_from_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    let pause = dir.path().join("pauselist");
    let stop = dir.path().join("stoplist");
    fs::write(&pause, "steam\nobs  steam\n\tgamescope\n").unwrap();

    let pause_list = WatchList::load(&pause).unwrap();
    assert_eq!(pause_list.names(), ["steam", "obs", "gamescope"]);

    // No stop list written: watcher disabled, not an error
    let stop_list = WatchList::load(&stop).unwrap();
    assert!(stop_list.is_empty());
}

#[test]
fn test_unreadable_list_disables_watcher() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stoplist");
    fs::create_dir(&path).unwrap();

    match WatchList::load(&path) {
        Err(Error::WatchList { path: failed, .. }) => assert_eq!(failed, path),
        other => panic!("expected a watch list error, got {:?}", other),
    }
    assert!(WatchList::load_or_empty(Some(&path)).is_empty());
}
