use thiserror::Error;

/// Error currency for the whole crate. Mirrors the error-kind table in the
/// component design: most variants propagate to the caller, a few (decay,
/// tool denial) are logged and swallowed by the component that produces them.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("config error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("decay error: {0}")]
    Decay(String),

    #[error("tool '{tool}' denied for role '{role}'")]
    ToolDenied { role: String, tool: String },

    #[error("tool error: {0}")]
    Tool(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("session cancelled")]
    Cancellation,

    #[error("router misconfigured: {0}")]
    RouterMisconfigured(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
