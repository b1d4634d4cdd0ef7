use thiserror::Error;

/// Errors raised while building collaborators from configuration.
///
/// Call-time failures are not represented here: they become a
/// `GenerationError` / `PublishError` reason stored on the post.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("caption provider `gemini` needs an API key (caption.api_key or GEMINI_API_KEY)")]
    MissingApiKey,

    #[error("publisher mode `webhook` needs publisher.webhook_url")]
    MissingWebhookUrl,

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
