//! Automod: filters, escalation and the per-message pipeline

pub mod escalation;
pub mod filters;
pub mod pipeline;
pub mod swear_words;

pub use escalation::EscalationTracker;
pub use filters::{FilterKind, FilterMatch, MentionSet};
pub use pipeline::{
    BypassReason, EscalationOutcome, InboundMessage, MessageState, ModerationPipeline,
    PipelineReport, Step, StepOutcome, StepReport,
};
