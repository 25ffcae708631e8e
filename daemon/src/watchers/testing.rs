//! Fakes for the engine and the process census.

use anyhow::Result;
use common::census::ProcessCensus;
use common::handoff::ResumeToken;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::{Advance, EngineEvent, MediaEngine};

/// Engine that records commands and replays scripted events
pub struct FakeEngine {
    paused: AtomicBool,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    advances: AtomicUsize,
    shutdowns: AtomicUsize,
    events: Mutex<VecDeque<EngineEvent>>,
    advance_results: Mutex<VecDeque<Advance>>,
    position: Mutex<ResumeToken>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            pauses: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            advances: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            events: Mutex::new(VecDeque::new()),
            advance_results: Mutex::new(VecDeque::new()),
            position: Mutex::new(ResumeToken::new(Duration::ZERO, 0)),
        }
    }

    pub fn push_event(&self, event: EngineEvent) {
        self.events.lock().unwrap().push_back(event);
    }

    /// Result of the next `advance`; `Continue` once the script runs out
    pub fn script_advance(&self, result: Advance) {
        self.advance_results.lock().unwrap().push_back(result);
    }

    pub fn set_position(&self, token: ResumeToken) {
        *self.position.lock().unwrap() = token;
    }

    pub fn pause_calls(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resume_calls(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn advance_calls(&self) -> usize {
        self.advances.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl MediaEngine for FakeEngine {
    fn pause(&self) -> Result<()> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn toggle_pause(&self) -> Result<()> {
        let was_paused = self.paused.fetch_xor(true, Ordering::SeqCst);
        self.push_event(if was_paused {
            EngineEvent::Unpaused
        } else {
            EngineEvent::Paused
        });
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn position(&self) -> ResumeToken {
        *self.position.lock().unwrap()
    }

    fn advance(&self) -> Result<Advance> {
        self.advances.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .advance_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Advance::Continue))
    }

    fn poll_events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().drain(..).collect()
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Census whose running set is controlled by the test
#[derive(Clone, Default)]
pub struct FakeCensus {
    running: Arc<Mutex<Vec<String>>>,
    polls: Arc<AtomicUsize>,
}

impl FakeCensus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, name: &str) {
        self.running.lock().unwrap().push(name.to_string());
    }

    pub fn stop(&self, name: &str) {
        self.running.lock().unwrap().retain(|n| n != name);
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

impl ProcessCensus for FakeCensus {
    fn find_running(&mut self, names: &[String]) -> Option<String> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.lock().unwrap();
        names.iter().find(|name| running.contains(name)).cloned()
    }
}
