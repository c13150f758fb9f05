use thiserror::Error;

/// Errors that can occur in the webhook ingestion layer.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The signature header did not match the payload. Deliveries failing
    /// this check are the only ones the HTTP layer rejects outright.
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    /// No signature header was supplied.
    #[error("webhook signature header missing")]
    SignatureMissing,

    /// No signing secret is configured. Verification fails closed rather
    /// than letting unsigned traffic through.
    #[error("webhook signing secret not configured")]
    SecretUnconfigured,

    /// The payload was not valid JSON.
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// A bank event referenced by id does not exist.
    #[error("bank event not found: {0}")]
    EventNotFound(uuid::Uuid),

    /// A DLQ entry referenced by id does not exist.
    #[error("dead letter entry not found: {0}")]
    DlqEntryNotFound(uuid::Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, WebhookError>;
