pub mod config;
pub mod context;
pub mod dedup;
pub mod session;

pub use config::{Backend, ServerConfig};
pub use context::{BootstrapError, CaptureOutcome, ServerContext};
pub use dedup::DuplicateSuppressor;
pub use session::{
    Clock, SessionAggregator, SessionError, SessionRecord, SessionSummary, SystemClock,
    new_session_id,
};
