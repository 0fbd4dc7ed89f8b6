//! Status events and operator feedback
//!
//! Each cavity keeps an ordered event log. Events are appended in the
//! exact order they occur, and the log keeps a poll cursor so callers
//! can replay everything since their last poll.

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::core::Pars;

/// Signals emitted by the inspection runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    CavityIdle,
    CavityBusy,
    CavityStopped,
    TestStarted,
    TestFinished,
    CheckStarted,
    CheckOngoing,
    CheckFinished,
    CheckCancelled,
    FeedbackRequest,
    Error,
}

/// One entry of a cavity's event stream
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub signal: Signal,

    /// Tracking key, state or message the signal refers to
    pub subject: String,

    pub at: DateTime<Utc>,
}

/// Observer notified on every state change of tests and checks
pub trait EventSink: Send + Sync {
    fn emit(&self, signal: Signal, subject: &str);
}

struct LogInner {
    events: Vec<Event>,
    cursor: usize,
}

/// Per-cavity ordered event log with replay-since-last-poll semantics
pub struct EventLog {
    inner: Mutex<LogInner>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LogInner {
                events: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Every event recorded so far, in emission order
    pub fn all(&self) -> Vec<Event> {
        self.inner.lock().events.clone()
    }

    /// Events emitted since the previous call; advances the cursor
    pub fn since_last_poll(&self) -> Vec<Event> {
        let mut inner = self.inner.lock();
        let fresh = inner.events[inner.cursor..].to_vec();
        inner.cursor = inner.events.len();
        fresh
    }
}

impl EventSink for EventLog {
    fn emit(&self, signal: Signal, subject: &str) {
        let mut inner = self.inner.lock();
        inner.events.push(Event {
            signal,
            subject: subject.to_string(),
            at: Utc::now(),
        });
    }
}

/// Operator-in-the-loop confirmation slot
///
/// A check blocks on `ask()` after emitting a feedback request; the
/// controller answers through
/// [`answer_feedback`](crate::inspector::InspectionService::answer_feedback),
/// which releases the waiting check.
pub struct FeedbackSlot {
    answer: Mutex<Option<Pars>>,
    signal: Condvar,
}

impl Default for FeedbackSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackSlot {
    pub fn new() -> Self {
        Self {
            answer: Mutex::new(None),
            signal: Condvar::new(),
        }
    }

    /// Emit a feedback request and block until an answer arrives
    pub fn ask(&self, sink: &dyn EventSink, subject: &str) -> Pars {
        let mut answer = self.answer.lock();
        *answer = None;
        sink.emit(Signal::FeedbackRequest, subject);
        loop {
            if let Some(data) = answer.take() {
                return data;
            }
            self.signal.wait(&mut answer);
        }
    }

    /// Deliver an operator answer, releasing the blocked check
    pub fn answer(&self, data: Pars) {
        let mut answer = self.answer.lock();
        *answer = Some(data);
        self.signal.notify_all();
    }
}
