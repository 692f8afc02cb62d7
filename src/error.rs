//! Error types for the Open Agent SDK

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the SDK
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// API error from the model server
    #[error("API error: {0}")]
    Api(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Timeout error
    #[error("Request timeout")]
    Timeout,

    /// Token or cost budget exceeded for the agent's run.
    #[error("Budget exceeded: {0}")]
    Budget(String),

    /// A hook rule denied the action (pre_tool_use/user_prompt_submit deny).
    #[error("Denied by hook: {0}")]
    HookDenied(String),

    /// Hub-side authorization failure (unsubscribed agent, expired token, bad PIN).
    #[error("Hub authorization failed: {0}")]
    HubAuth(String),

    /// Web push delivery/subscription error.
    #[error("Push error: {0}")]
    Push(String),

    /// Scheduler entry or grammar error (cron/event condition).
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Viewport streaming protocol error.
    #[error("Viewport error: {0}")]
    Viewport(String),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new API error
    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Create a new tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new other error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Create a new budget error
    pub fn budget(msg: impl Into<String>) -> Self {
        Error::Budget(msg.into())
    }

    /// Create a new hook-denied error
    pub fn hook_denied(msg: impl Into<String>) -> Self {
        Error::HookDenied(msg.into())
    }

    /// Create a new hub-authorization error
    pub fn hub_auth(msg: impl Into<String>) -> Self {
        Error::HubAuth(msg.into())
    }

    /// Create a new push error
    pub fn push(msg: impl Into<String>) -> Self {
        Error::Push(msg.into())
    }

    /// Create a new scheduler error
    pub fn scheduler(msg: impl Into<String>) -> Self {
        Error::Scheduler(msg.into())
    }

    /// Create a new viewport error
    pub fn viewport(msg: impl Into<String>) -> Self {
        Error::Viewport(msg.into())
    }
}
