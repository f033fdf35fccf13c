//! 会话归因

pub mod classifier;
pub mod clock;
pub mod context;
pub mod engine;
pub mod identity;
pub mod options;
pub mod record;

pub use classifier::ParamClassifier;
pub use clock::{Clock, FixedClock, SystemClock};
pub use context::RequestContext;
pub use engine::{
    AttributionEngine, IdSource, SessionCookie, TrackOutcome, TrackState, TrackerSettings,
};
pub use options::TrackingOptions;
pub use record::{ParseFailure, SessionRecord};
