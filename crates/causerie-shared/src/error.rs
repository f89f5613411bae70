use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Malformed payload for {event}: {source}")]
    MalformedPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
