//! The tunebridge synchronization engine.
//!
//! Watches nothing and sends nothing itself: the chat transport feeds it
//! message text, and it drives the playlist client. What lives here is the
//! part with invariants — ordered backlog replay behind a durable cursor,
//! reference extraction, duration policy, a serialized append pipeline with
//! remote deduplication, and the process-wide quota pause/resume gate.

mod cursor;
mod engine;
mod error;
mod extract;
mod policy;
mod quota;
mod replay;
mod submit;

pub use cursor::CursorStore;
pub use engine::{ItemOutcome, MessageReport, SyncEngine};
pub use error::{CursorError, PolicyError, ReplayError, SubmitError};
pub use extract::extract_video_ids;
pub use policy::{DurationPolicy, DurationVerdict};
pub use quota::{DEFAULT_RESET_SCHEDULE, QuotaGate};
pub use replay::{HistorySource, HorizonMarker, MessageSink, Replayer};
pub use submit::{SubmissionQueue, SubmitOutcome};
