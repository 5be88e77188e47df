//! pulsebot-interaction: decides whether an automated action may run.
//!
//! Gates candidates (dedup, thread mutes, depth limit, keywords,
//! engagement, random skip) before a reply is generated, and gates the
//! generated text for control directives before it is posted.

pub mod control;
pub mod engagement;
pub mod engine;
pub mod pipeline;
pub mod processed;

pub use control::detect_control_response;
pub use engagement::calculate_engagement_score;
pub use engine::{InteractionControl, RandomSource};
pub use pipeline::{CandidateSource, CycleReport, ReplyGenerator, ReplyPipeline, ReplyPublisher};
pub use processed::ProcessedItems;
