//! Built-in text extraction per artifact source kind.
//!
//! Extraction is pipeline-layer: the ingest job supplies raw bytes plus a
//! [`SourceKind`]; this module returns plain UTF-8 text or an extraction
//! error that fails the job (no panic, no partial output).
//!
//! | Kind | Handling |
//! |------|----------|
//! | `document` | PDF via `pdf-extract` when the magic matches, else UTF-8 |
//! | `chat_export` | JSON message array flattened to `sender: text` lines |
//! | `code` | UTF-8 passthrough |
//! | `image` | rejected with `unsupported_format` |

use async_trait::async_trait;

use crate::capability::TextExtractor;
use crate::error::{EngineError, Result};
use crate::models::{Artifact, SourceKind};

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Default [`TextExtractor`] covering the supported source kinds.
pub struct BuiltinExtractor;

impl BuiltinExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BuiltinExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextExtractor for BuiltinExtractor {
    async fn extract(&self, artifact: &Artifact) -> Result<String> {
        if artifact.bytes.is_empty() {
            return Err(EngineError::Extraction(format!(
                "artifact {} is empty",
                artifact.id
            )));
        }

        let text = match artifact.kind {
            SourceKind::Document => extract_document(&artifact.bytes)?,
            SourceKind::ChatExport => extract_chat_export(&artifact.bytes)?,
            SourceKind::Code => utf8_text(&artifact.bytes)?,
            SourceKind::Image => {
                return Err(EngineError::UnsupportedFormat(format!(
                    "image artifact {} has no text representation",
                    artifact.id
                )))
            }
        };

        if text.trim().is_empty() {
            return Err(EngineError::Extraction(format!(
                "artifact {} produced no text",
                artifact.id
            )));
        }
        Ok(text)
    }
}

fn extract_document(bytes: &[u8]) -> Result<String> {
    if bytes.starts_with(PDF_MAGIC) {
        pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| EngineError::Extraction(format!("PDF extraction failed: {}", e)))
    } else {
        utf8_text(bytes)
    }
}

/// Flatten a chat export into one `sender: text` line per message.
///
/// Accepts either a bare JSON array of messages or an object with a
/// `messages` array. Message text is read from `text` or `content`, the
/// sender from `sender` or `role`. Non-JSON exports fall back to plain text.
fn extract_chat_export(bytes: &[u8]) -> Result<String> {
    let raw = utf8_text(bytes)?;
    let value: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(_) => return Ok(raw),
    };

    let messages = match &value {
        serde_json::Value::Array(items) => items.as_slice(),
        serde_json::Value::Object(map) => match map.get("messages").and_then(|m| m.as_array()) {
            Some(items) => items.as_slice(),
            None => {
                return Err(EngineError::Extraction(
                    "chat export has no messages array".to_string(),
                ))
            }
        },
        _ => {
            return Err(EngineError::Extraction(
                "chat export is neither a message array nor an object".to_string(),
            ))
        }
    };

    let mut out = String::new();
    for message in messages {
        let text = message
            .get("text")
            .or_else(|| message.get("content"))
            .and_then(|t| t.as_str())
            .unwrap_or("");
        if text.is_empty() {
            continue;
        }
        let sender = message
            .get("sender")
            .or_else(|| message.get("role"))
            .and_then(|s| s.as_str())
            .unwrap_or("unknown");
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(sender);
        out.push_str(": ");
        out.push_str(text);
    }
    Ok(out)
}

fn utf8_text(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| EngineError::Extraction(format!("invalid UTF-8: {}", e)))
}
