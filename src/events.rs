//! Event codes emitted by governance, idempotency, and the order router.
//!
//! String literals are narrowed from `observability/codes.py` to exactly
//! the families spec.md §6 documents; the source file's `EXEC.*`/`ORDER.*`/
//! `POLICY.*`/`HEALTH.*` families are out of scope and not reproduced here.
//!
//! Emission goes through an `EventSink` trait rather than a log call
//! directly, so callers (and tests) can observe what was emitted without
//! standing up a real log/metrics backend — the log *sink* itself stays an
//! external collaborator per spec.md §1.

pub mod codes {
    pub const AURORA_HALT: &str = "AURORA.HALT";
    pub const AURORA_RESUME: &str = "AURORA.RESUME";

    pub const RISK_DENY_DRAWDOWN: &str = "RISK.DENY.DRAWDOWN";
    pub const RISK_DENY_CVAR: &str = "RISK.DENY.CVAR";
    pub const RISK_DENY_POS_LIMIT: &str = "RISK.DENY.POS_LIMIT";

    pub const SPREAD_GUARD_TRIP: &str = "SPREAD_GUARD_TRIP";
    pub const LATENCY_GUARD_TRIP: &str = "LATENCY_GUARD_TRIP";
    pub const VOLATILITY_GUARD_TRIP: &str = "VOLATILITY_GUARD_TRIP";

    pub const DQ_STALE_BOOK: &str = "DQ.STALE_BOOK";
    pub const DQ_CROSSED_BOOK: &str = "DQ.CROSSED_BOOK";
    pub const DQ_ABNORMAL_SPREAD: &str = "DQ.ABNORMAL_SPREAD";

    pub const IDEM_STORE: &str = "IDEM.STORE";
    pub const IDEM_HIT: &str = "IDEM.HIT";
    pub const IDEM_DUP: &str = "IDEM.DUP";
    pub const IDEM_CONFLICT: &str = "IDEM.CONFLICT";
    pub const IDEM_UPDATE: &str = "IDEM.UPDATE";

    pub const SPRT_DECISION_H0: &str = "SPRT.DECISION_H0";
    pub const SPRT_DECISION_H1: &str = "SPRT.DECISION_H1";
    pub const SPRT_DECISION_CONTINUE: &str = "SPRT.DECISION_CONTINUE";
    pub const SPRT_DECISION_ERROR: &str = "SPRT.DECISION_ERROR";
}

/// A structured governance/idempotency event, carrying the fields a real
/// sink would want to index on without forcing callers to parse a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub code: &'static str,
    pub subject: String,
    pub detail: String,
}

impl Event {
    pub fn new(code: &'static str, subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code,
            subject: subject.into(),
            detail: detail.into(),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Default sink: forwards to `tracing`. Emission never fails the calling
/// operation (spec.md §4.5 — event emission is best-effort).
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        tracing::info!(code = event.code, subject = %event.subject, detail = %event.detail, "event");
    }
}

/// Sink that records events in memory, for assertions in tests (used to
/// check spec.md §8 scenarios expect exact sequences like IDEM.STORE,
/// IDEM.UPDATE, IDEM.HIT, IDEM.DUP).
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: parking_lot::Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.code).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}
