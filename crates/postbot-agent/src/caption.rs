use std::sync::Arc;

use async_trait::async_trait;
use postbot_core::config::{CaptionConfig, CaptionProviderKind};
use postbot_scheduler::{CaptionGenerator, GenerationError};
use tracing::info;

use crate::{error::AgentError, gemini::GeminiCaptioner};

pub const DEFAULT_STATIC_CAPTION: &str = "New post ✨ #postbot #newpost #share";

/// Returns the same caption for every post. No network.
pub struct StaticCaptioner {
    caption: String,
}

impl StaticCaptioner {
    pub fn new(caption: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
        }
    }
}

#[async_trait]
impl CaptionGenerator for StaticCaptioner {
    fn name(&self) -> &str {
        "static"
    }

    async fn generate_caption(&self, _: &[u8], _: &str) -> Result<String, GenerationError> {
        Ok(self.caption.clone())
    }
}

/// Build the configured caption generator.
///
/// `gemini` takes its key from `caption.api_key`, falling back to the
/// `GEMINI_API_KEY` environment variable.
pub fn build_captioner(config: &CaptionConfig) -> Result<Arc<dyn CaptionGenerator>, AgentError> {
    match config.provider {
        CaptionProviderKind::Gemini => {
            let api_key = config
                .api_key
                .clone()
                .or_else(|| std::env::var("GEMINI_API_KEY").ok())
                .filter(|k| !k.is_empty())
                .ok_or(AgentError::MissingApiKey)?;
            info!(model = %config.model, "caption provider: gemini");
            Ok(Arc::new(GeminiCaptioner::new(api_key, config)?))
        }
        CaptionProviderKind::Static => {
            info!("caption provider: static");
            let caption = config
                .static_caption
                .clone()
                .unwrap_or_else(|| DEFAULT_STATIC_CAPTION.to_string());
            Ok(Arc::new(StaticCaptioner::new(caption)))
        }
    }
}
