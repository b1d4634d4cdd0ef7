//! `postbot-agent`: the outbound collaborators the pipeline calls:
//! caption generators and publishers, plus builders that pick one from
//! [`postbot_core::config`].

pub mod caption;
pub mod error;
pub mod gemini;
pub mod publisher;

pub use caption::{build_captioner, StaticCaptioner};
pub use error::AgentError;
pub use gemini::GeminiCaptioner;
pub use publisher::{build_publisher, SimulatedPublisher, WebhookPublisher};
