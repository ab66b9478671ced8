//! Prompting and reply parsing for piano title metadata.

use std::sync::Arc;

use pieces_core::{ExtractionRecord, NOT_AVAILABLE};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::warn;

use crate::client::ChatBackend;
use crate::error::Result;
use crate::types::{ChatRequest, Message};

pub const DEFAULT_MODEL: &str = "gemma2";
pub const MAX_TOKENS: u32 = 1000;
pub const TEMPERATURE: f32 = 0.0;

const SYSTEM_PROMPT: &str = "You are a helpful assistant that extracts information from classical piano music titles. \
Your task is to identify and extract the following components from the title: \
composer, title, catalog number, key, and form. \
Follow a step-by-step reasoning process to ensure accuracy. \
The output should be a standardized JSON object with 'N/A' as placeholders for missing information. \
Format composer names as in this example: 'B. Bartok'. Use the first initial of the first name, followed \
by a period, and then the full surname without accents or special characters. \
Catalog numbers should be formatted as 'op' or another identifier, optionally followed by a comma, \
and then the number of the piece, and optionally including the movement. For example: 'op. 25, No. 1'. \
Keys should match this pattern: an uppercase letter A-G, optionally followed by '#' or 'b', with 'major' \
or 'minor' following, e.g., 'C major', 'F# minor'.";

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

pub fn user_prompt(title: &str) -> String {
    format!(
        "Analyze the following title and extract its main identifiers: {title}. \
         Please ensure that the output is in JSON format with these keys: 'Composer', 'Title', \
         'Catalog Number', 'Key', and 'Form'. Use 'N/A' for any missing information."
    )
}

#[derive(Debug, Error)]
enum ReplyParseError {
    #[error("no brace-delimited object in reply")]
    NoObject,
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("reply JSON is not an object")]
    NotAnObject,
}

/// Extracts the five schema fields from a free-text title via a chat backend.
///
/// The backend is shared; one instance serves every dataset in a run.
#[derive(Clone)]
pub struct Extractor {
    backend: Arc<dyn ChatBackend>,
    model: String,
}

impl Extractor {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn build_request(&self, title: &str) -> ChatRequest {
        ChatRequest::new(self.model.clone())
            .message(Message::system(SYSTEM_PROMPT))
            .message(Message::user(user_prompt(title)))
            .max_tokens(MAX_TOKENS)
            .temperature(TEMPERATURE)
    }

    /// One round-trip to the backend. Unparseable replies become a placeholder
    /// record; backend failures are returned to the caller.
    pub async fn extract(&self, title: &str) -> Result<ExtractionRecord> {
        let request = self.build_request(title);
        let reply = self.backend.complete(&request).await?;
        Ok(parse_reply(title, &reply))
    }
}

/// Slice from the first `{` to the last `}`, inclusive.
pub fn locate_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Turn a raw model reply into a record. Never fails.
pub fn parse_reply(query: &str, reply: &str) -> ExtractionRecord {
    match parse_object(reply) {
        Ok(object) => project_onto_schema(&object, query, reply),
        Err(err) => {
            warn!(error = %err, query, "error parsing JSON output");
            ExtractionRecord::placeholder(query, reply)
        }
    }
}

fn parse_object(reply: &str) -> std::result::Result<Map<String, JsonValue>, ReplyParseError> {
    let slice = locate_json_object(reply).ok_or(ReplyParseError::NoObject)?;
    match serde_json::from_str::<JsonValue>(slice)? {
        JsonValue::Object(map) => Ok(map),
        _ => Err(ReplyParseError::NotAnObject),
    }
}

fn project_onto_schema(object: &Map<String, JsonValue>, query: &str, reply: &str) -> ExtractionRecord {
    let field = |key: &str| match object.get(key) {
        None | Some(JsonValue::Null) => NOT_AVAILABLE.to_string(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };

    ExtractionRecord {
        composer: field("Composer"),
        title: field("Title"),
        catalog_number: field("Catalog Number"),
        key: field("Key"),
        form: field("Form"),
        error: None,
        query: query.to_string(),
        answer: reply.to_string(),
    }
}
