/*!
 * Envelope decoding and sanitizing
 *
 * The transport emits one JSON envelope per received message. Its `data`
 * field carries the published bytes, which are normally a CBOR map. Decoding
 * turns that map into a single JSON line with bulky and sensitive fields
 * removed and the fields people scan for moved to the front.
 *
 * Outcomes are three-way: a sanitized JSON line, the raw payload as text when
 * it is not a CBOR map, or nothing printable at all.
 */

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use indexmap::IndexMap;
use serde_cbor::Value;

use crate::error::DecodeError;

/// Field hoisted to the front of every record
pub const TYPE_FIELD: &str = "type";

/// Request identifier, hoisted second and rendered as base58btc text
pub const REQUEST_ID_FIELD: &str = "challengeRequestId";

/// Fields never persisted
pub const STRIPPED_FIELDS: [&str; 6] = [
    "encryptedPublication",
    "encryptedChallenges",
    "encryptedChallengeAnswers",
    "acceptedChallengeTypes",
    "protocolVersion",
    "signature",
];

/// Multibase prefix for base64url
const MULTIBASE_BASE64URL: char = 'u';

/// base64url, with or without padding
const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decoded message ready for the log writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Sanitized CBOR map serialized as one JSON line
    Decoded(String),

    /// Payload was not a CBOR map; lossy UTF-8 with line breaks escaped
    RawText(String),

    /// Empty payload; nothing to log
    Unrepresentable(Vec<u8>),
}

impl Record {
    /// Text to persist, if any
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Record::Decoded(text) | Record::RawText(text) => Some(text),
            Record::Unrepresentable(_) => None,
        }
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self, Record::Decoded(_))
    }
}

/// Decode one line of subscription output.
///
/// Fails only when the line is not a payload envelope; callers drop those
/// lines without logging, since the transport also prints status text.
pub fn decode_envelope(line: &[u8]) -> Result<Record, DecodeError> {
    let payload = envelope_payload(line)?;
    Ok(decode_payload(payload))
}

/// Extract and base64url-decode the `data` field of an envelope
pub fn envelope_payload(line: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let envelope: serde_json::Value =
        serde_json::from_slice(line).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let data = envelope
        .as_object()
        .ok_or_else(|| DecodeError::InvalidJson("not an object".to_string()))?
        .get("data")
        .and_then(serde_json::Value::as_str)
        .ok_or(DecodeError::MissingData)?;

    decode_base64url(data)
}

/// Decode base64url text, accepting the multibase `u` prefix the transport adds
fn decode_base64url(data: &str) -> Result<Vec<u8>, DecodeError> {
    if let Some(stripped) = data.strip_prefix(MULTIBASE_BASE64URL) {
        if let Ok(bytes) = BASE64URL.decode(stripped) {
            return Ok(bytes);
        }
    }
    BASE64URL
        .decode(data)
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))
}

/// Classify a payload: sanitized CBOR map, raw text, or unrepresentable
pub fn decode_payload(payload: Vec<u8>) -> Record {
    match serde_cbor::from_slice::<IndexMap<String, Value>>(&payload) {
        Ok(message) => match serde_json::to_string(&sanitize(message)) {
            Ok(line) => Record::Decoded(line),
            Err(e) => {
                tracing::trace!("sanitized message is not JSON-representable: {}", e);
                raw_fallback(payload)
            }
        },
        Err(_) => raw_fallback(payload),
    }
}

fn raw_fallback(payload: Vec<u8>) -> Record {
    if payload.is_empty() {
        return Record::Unrepresentable(payload);
    }
    // Invalid sequences become U+FFFD so corrupt messages still leave a trace
    Record::RawText(escape_line_breaks(&String::from_utf8_lossy(&payload)))
}

/// Keep each record on a single line
fn escape_line_breaks(text: &str) -> String {
    text.replace('\r', "\\r").replace('\n', "\\n")
}

/// Strip persisted-never fields, render the request id, hoist scan fields.
///
/// Remaining fields keep their original relative order.
pub fn sanitize(mut message: IndexMap<String, Value>) -> IndexMap<String, Value> {
    for field in STRIPPED_FIELDS {
        message.shift_remove(field);
    }

    if let Some(request_id) = message.get_mut(REQUEST_ID_FIELD) {
        if let Some(text) = request_id_text(request_id) {
            *request_id = Value::Text(text);
        }
    }

    let mut sorted = IndexMap::with_capacity(message.len());
    for field in [TYPE_FIELD, REQUEST_ID_FIELD] {
        if let Some(value) = message.shift_remove(field) {
            sorted.insert(field.to_string(), value);
        }
    }
    sorted.extend(message);
    sorted
}

/// base58btc rendering of a byte-string request id; other shapes stay as-is
fn request_id_text(value: &Value) -> Option<String> {
    match value {
        Value::Bytes(bytes) => Some(bs58::encode(bytes).into_string()),
        _ => None,
    }
}
