use thiserror::Error;

/// Failure taxonomy for the message-processing and delivery pipeline.
///
/// `TransientDelivery` is retried by the dispatcher and never reaches the
/// ingestion path; `PermanentDelivery` is recorded on the event and exposed
/// through the stats endpoint. A missing or disabled configuration is not an
/// error for inbound messages (features are simply off) but is one for the
/// configuration API.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("transient delivery failure: {0}")]
    TransientDelivery(String),

    #[error("delivery attempts exhausted: {0}")]
    PermanentDelivery(String),

    #[error("classifier backend unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("no configuration for community {0}")]
    ConfigNotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
