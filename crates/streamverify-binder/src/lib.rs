//! Verification binder: finds categorised groups in a rendered document,
//! gives each one a trigger and an output region, and runs the streaming
//! client when a trigger fires.

mod binder;
pub mod document;
mod error;
pub mod scan;
pub mod sink;

pub use binder::{
    Activation, Binding, BoundGroup, FAILURE_PLACEHOLDER, OutputState, RequestSettings,
    TriggerState, VerificationBinder,
};
pub use document::{Element, Node, parse_xhtml};
pub use error::{BinderError, SinkError};
pub use scan::{GroupingPolicy, HandleOrigin, TaggingConvention, VerificationGroup, scan};
pub use sink::{JsonFileSink, MemorySink, VerificationSink};
