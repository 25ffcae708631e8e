//! Process presence checks for the watch lists.

use std::ffi::OsStr;
use std::path::Path;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

/// Answers "is any of these programs running right now?".
///
/// Failing to inspect the process table counts as "not running" for that
/// poll; the caller simply asks again on its next tick.
pub trait ProcessCensus: Send {
    /// The first name in `names` that matches a running process.
    fn find_running(&mut self, names: &[String]) -> Option<String>;
}

/// Census backed by the system process table.
pub struct SysinfoCensus {
    system: System,
}

impl SysinfoCensus {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn refresh(&mut self) {
        let kind = ProcessRefreshKind::nothing()
            .with_exe(UpdateKind::OnlyIfNotSet)
            .with_cmd(UpdateKind::OnlyIfNotSet);
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, true, kind);
    }
}

impl Default for SysinfoCensus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessCensus for SysinfoCensus {
    fn find_running(&mut self, names: &[String]) -> Option<String> {
        if names.is_empty() {
            return None;
        }
        self.refresh();

        let own_pid = sysinfo::get_current_pid().ok();
        for process in self.system.processes().values() {
            if Some(process.pid()) == own_pid {
                continue;
            }
            let exe_name = process.exe().and_then(Path::file_name);
            let argv0_name = process
                .cmd()
                .first()
                .and_then(|arg| Path::new(arg).file_name());

            if let Some(name) = names
                .iter()
                .find(|name| process_matches(name, process.name(), exe_name, argv0_name))
            {
                log::trace!("Found running process '{}' (pid {})", name, process.pid());
                return Some(name.clone());
            }
        }
        None
    }
}

/// Kernel process names are truncated to 15 bytes, so the executable and
/// argv[0] basenames are checked as well.
fn process_matches(
    wanted: &str,
    comm: &OsStr,
    exe_name: Option<&OsStr>,
    argv0_name: Option<&OsStr>,
) -> bool {
    let wanted = OsStr::new(wanted);
    comm == wanted || exe_name == Some(wanted) || argv0_name == Some(wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_matches_comm() {
        assert!(process_matches("steam", OsStr::new("steam"), None, None));
        assert!(!process_matches("steam", OsStr::new("steamwebhelper"), None, None));
    }

    #[test]
    fn test_process_matches_truncated_comm() {
        // comm is cut at 15 bytes, the exe basename is not
        assert!(process_matches(
            "wine64-preloader",
            OsStr::new("wine64-preloade"),
            Some(OsStr::new("wine64-preloader")),
            None,
        ));
        assert!(process_matches(
            "python-game",
            OsStr::new("python3"),
            Some(OsStr::new("python3.12")),
            Some(OsStr::new("python-game")),
        ));
    }

    #[test]
    fn test_empty_list_short_circuits() {
        let mut census = SysinfoCensus::new();
        assert_eq!(census.find_running(&[]), None);
    }
}
