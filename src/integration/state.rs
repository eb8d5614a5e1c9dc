//! Application state and its transition table
//!
//! [`StateMachine`] is the only owner of [`ApplicationState`]. Every change
//! goes through [`StateMachine::fire`], which holds one mutex for the
//! lookup and the write, so two actors racing on the same edge (a watchdog
//! and a normal completion) produce exactly one transition.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApplicationState {
    Idle,
    Recording,
    Processing,
    Speaking,
    Error,
}

impl ApplicationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationState::Idle => "Idle",
            ApplicationState::Recording => "Recording",
            ApplicationState::Processing => "Processing",
            ApplicationState::Speaking => "Speaking",
            ApplicationState::Error => "Error",
        }
    }

    /// Where `trigger` leads from this state, `None` for an illegal pair
    pub fn next(self, trigger: Trigger) -> Option<ApplicationState> {
        use ApplicationState::*;
        match (self, trigger) {
            (Idle, Trigger::Press) => Some(Recording),
            (Recording, Trigger::Release) => Some(Processing),
            (Processing, Trigger::ReplyReady) => Some(Speaking),
            (Speaking, Trigger::PlaybackFinished) => Some(Idle),
            (Error, Trigger::Recovered) => Some(Idle),
            (Error, Trigger::Fault) => None,
            (_, Trigger::Fault) => Some(Error),
            _ => None,
        }
    }

    /// Whether `from -> to` appears in the transition table
    pub fn is_legal(from: ApplicationState, to: ApplicationState) -> bool {
        Trigger::ALL.iter().any(|t| from.next(*t) == Some(to))
    }
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened, as seen by the state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Trigger {
    Press,
    Release,
    /// Recognition, generation and synthesis all succeeded
    ReplyReady,
    /// Playback completed or its watchdog fired
    PlaybackFinished,
    /// Any failure, from any state
    Fault,
    /// Error handling is complete
    Recovered,
}

impl Trigger {
    pub const ALL: [Trigger; 6] = [
        Trigger::Press,
        Trigger::Release,
        Trigger::ReplyReady,
        Trigger::PlaybackFinished,
        Trigger::Fault,
        Trigger::Recovered,
    ];
}

/// One recorded state change
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub from: ApplicationState,
    pub to: ApplicationState,
    pub trigger: Trigger,
    pub at: DateTime<Utc>,
}

struct Inner {
    current: ApplicationState,
    trace: VecDeque<Transition>,
    ignored: u64,
}

pub struct StateMachine {
    inner: Mutex<Inner>,
    trace_limit: usize,
}

impl StateMachine {
    /// Starts in `Idle`, remembering the last `trace_limit` transitions
    pub fn new(trace_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: ApplicationState::Idle,
                trace: VecDeque::with_capacity(trace_limit.min(1024)),
                ignored: 0,
            }),
            trace_limit: trace_limit.max(1),
        }
    }

    pub fn current(&self) -> ApplicationState {
        self.inner.lock().current
    }

    /// Apply `trigger`; illegal pairs are ignored and return `None`
    pub fn fire(&self, trigger: Trigger) -> Option<Transition> {
        let mut inner = self.inner.lock();
        let from = inner.current;

        let Some(to) = from.next(trigger) else {
            inner.ignored += 1;
            debug!(state = %from, ?trigger, "Ignored event with no transition");
            return None;
        };

        let transition = Transition {
            from,
            to,
            trigger,
            at: Utc::now(),
        };
        inner.current = to;
        if inner.trace.len() >= self.trace_limit {
            inner.trace.pop_front();
        }
        inner.trace.push_back(transition.clone());
        info!(from = %from, to = %to, ?trigger, "State transition");
        Some(transition)
    }

    /// Recorded transitions, oldest first
    pub fn trace(&self) -> Vec<Transition> {
        self.inner.lock().trace.iter().cloned().collect()
    }

    /// Number of triggers that matched no transition
    pub fn ignored(&self) -> u64 {
        self.inner.lock().ignored
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new(256)
    }
}
