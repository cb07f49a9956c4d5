//! Decoding of request attachments shipped as `data:` URIs.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

use crate::models::Attachment;

const DEFAULT_MIME_TYPE: &str = "text/plain";

#[derive(Error, Debug, PartialEq)]
pub enum AttachmentError {
    #[error("Malformed data URI: {0}")]
    Malformed(String),

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),
}

/// Raw bytes recovered from a data URI.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAttachment {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Attachment as handed to the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedAttachment {
    pub name: String,
    pub mime_type: String,
    pub size: usize,
    /// Present only when the payload is valid UTF-8.
    pub text: Option<String>,
}

/// Decode `data:[<mime>][;base64],<payload>`.
///
/// Anything that is not a data URI (a plain https link, say) decodes to an
/// empty payload rather than an error.
pub fn decode_data_uri(uri: &str) -> Result<DecodedAttachment, AttachmentError> {
    let Some(rest) = uri.strip_prefix("data:") else {
        return Ok(DecodedAttachment {
            mime_type: String::new(),
            bytes: Vec::new(),
        });
    };

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| AttachmentError::Malformed("missing ',' separator".to_string()))?;

    let mut params = header.split(';');
    let mime_type = params
        .next()
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string();
    let is_base64 = params.any(|p| p.eq_ignore_ascii_case("base64"));

    let bytes = if is_base64 {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| AttachmentError::InvalidBase64(e.to_string()))?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };

    Ok(DecodedAttachment { mime_type, bytes })
}

/// Decode every attachment. Failures are logged and yield an empty entry so a
/// single bad attachment never sinks the build.
pub fn process_attachments(attachments: &[Attachment]) -> Vec<ProcessedAttachment> {
    attachments
        .iter()
        .map(|attachment| match decode_data_uri(&attachment.url) {
            Ok(decoded) => {
                let size = decoded.bytes.len();
                let text = if size == 0 {
                    None
                } else {
                    String::from_utf8(decoded.bytes).ok()
                };
                ProcessedAttachment {
                    name: attachment.name.clone(),
                    mime_type: decoded.mime_type,
                    size,
                    text,
                }
            }
            Err(e) => {
                tracing::warn!(
                    attachment = %attachment.name,
                    error = %e,
                    "Failed to decode attachment"
                );
                ProcessedAttachment {
                    name: attachment.name.clone(),
                    mime_type: String::new(),
                    size: 0,
                    text: None,
                }
            }
        })
        .collect()
}
