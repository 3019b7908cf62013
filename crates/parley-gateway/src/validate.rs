use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;

use parley_types::{Attachment, ChatError};

/// Check an inline attachment: a name, a MIME type, and a base64 payload
/// (bare or as a `data:<mime>;base64,` URL) that decodes to at most
/// `max_bytes`. Returns the decoded size.
pub fn attachment(attachment: &Attachment, max_bytes: usize) -> Result<usize, ChatError> {
    if attachment.name.trim().is_empty() {
        return Err(ChatError::InvalidPayload("attachment name must not be empty".into()));
    }
    if attachment.mime_type.trim().is_empty() {
        return Err(ChatError::InvalidPayload("attachment mimeType must not be empty".into()));
    }

    let encoded = strip_data_url(&attachment.payload)?;

    // Cheap upper bound first so an oversized payload is never decoded.
    if base64::decoded_len_estimate(encoded.len()) > max_bytes + 2 {
        return Err(too_large(max_bytes));
    }

    let decoded = B64
        .decode(encoded)
        .map_err(|e| ChatError::InvalidPayload(format!("attachment payload is not base64: {e}")))?;
    if decoded.len() > max_bytes {
        return Err(too_large(max_bytes));
    }

    Ok(decoded.len())
}

fn strip_data_url(payload: &str) -> Result<&str, ChatError> {
    let Some(rest) = payload.strip_prefix("data:") else {
        return Ok(payload.trim());
    };

    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| ChatError::InvalidPayload("malformed data URL".into()))?;
    if !header.ends_with(";base64") {
        return Err(ChatError::InvalidPayload("data URL must be base64 encoded".into()));
    }
    Ok(data.trim())
}

fn too_large(max_bytes: usize) -> ChatError {
    ChatError::InvalidPayload(format!("attachment larger than {max_bytes} bytes"))
}
