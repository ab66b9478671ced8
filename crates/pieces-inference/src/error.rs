use thiserror::Error;

pub type Result<T> = std::result::Result<T, InferenceError>;

/// Endpoint failures. These are never recovered per item; callers abort the run.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("chat request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("http status {status} from {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },

    #[error("chat response contained no choices")]
    EmptyResponse,
}
