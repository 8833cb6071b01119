use thiserror::Error;

/// Every way a generation workflow can fail, in the order the pipeline can
/// hit them. The orchestrator flattens these into a `GenerationOutcome`;
/// nothing below it ever surfaces a raw transport error to callers.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("too many input images: {count} (maximum {max})")]
    TooManyImages { count: usize, max: usize },

    #[error("input image '{name}' is too large ({size_bytes} bytes, maximum {max_bytes})")]
    ImageTooLarge {
        name: String,
        size_bytes: u64,
        max_bytes: u64,
    },

    #[error("unsupported resolution '{value}' (expected one of 1K, 2K, 4K)")]
    UnsupportedResolution { value: String },

    #[error("unsupported output format '{value}' (expected png or jpg)")]
    UnsupportedOutputFormat { value: String },

    #[error("input image not found: {path}")]
    FileNotFound { path: String },

    #[error("object storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    #[error("upload to object storage failed: {message}")]
    UploadFailed { message: String },

    #[error("task submission rejected: {message}")]
    SubmissionRejected { message: String },

    #[error("status poll failed: {message}")]
    PollTransport { message: String },

    #[error("generation failed: {message}")]
    RemoteFailure { message: String },

    #[error("no terminal state after {elapsed_secs:.1}s (last state: {last_state})")]
    TimedOut {
        elapsed_secs: f64,
        last_state: String,
    },

    #[error("task succeeded but returned no result URL")]
    NoResultUrl,

    #[error("generation cancelled by caller")]
    Cancelled,
}
