//! Chat-completion client and the title metadata extractor built on it.

pub mod client;
pub mod error;
pub mod extractor;
pub mod types;

pub use client::{ChatBackend, InferenceConfig, OpenAiCompatClient};
pub use error::{InferenceError, Result};
pub use extractor::{locate_json_object, parse_reply, Extractor};
pub use types::{ChatRequest, Message};

pub const CRATE_NAME: &str = "pieces-inference";
