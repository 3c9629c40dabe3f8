//! Attachment records, short references and binary payloads.
//!
//! A short reference (`a1b2c3.png`) stands in for a payload that lives in the
//! blob store. Payloads travel as raw bytes plus a mime type and are only turned
//! back into data URIs at the edges (resolution and persistence).

use std::borrow::Borrow;
use std::fmt;

use base64::{
    Engine,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig, general_purpose::STANDARD},
};
use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::error::DomainError;

/// Number of random characters in a generated reference stem.
pub const REFERENCE_STEM_LEN: usize = 6;

/// Extension used when the declared mime type gives nothing better.
pub const DEFAULT_EXTENSION: &str = "jpg";

const REFERENCE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Whether a browser displays files of this mime type itself instead of
/// saving them; decides between an open link and a download link for `FILE`
/// embeds.
pub fn supports_inline_preview(mime: &str) -> bool {
    let essence = mime_essence(mime);
    match essence.split_once('/') {
        Some(("image" | "video" | "audio" | "text", _)) => true,
        _ => essence == "application/pdf",
    }
}

/// Infer the file extension used for a short reference from a mime type.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime_essence(mime).as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/avif" => "avif",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "audio/wav" | "audio/x-wav" => "wav",
        "application/pdf" => "pdf",
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|candidates| {
                candidates
                    .iter()
                    .copied()
                    .find(|ext| ext.len() == 3 && ext.bytes().all(|b| b.is_ascii_alphanumeric()))
            })
            .unwrap_or(DEFAULT_EXTENSION),
    }
}

fn mime_essence(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Guess a mime type from a file name or reference.
pub fn mime_for_name(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Compact opaque reference to a payload stored out of band.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShortRef(String);

impl ShortRef {
    /// Generate a fresh random reference with the given extension.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, extension: &str) -> Self {
        let stem: String = (0..REFERENCE_STEM_LEN)
            .map(|_| {
                let index = rng.random_range(0..REFERENCE_ALPHABET.len());
                char::from(REFERENCE_ALPHABET[index])
            })
            .collect();
        Self(format!("{stem}.{}", extension.to_ascii_lowercase()))
    }

    /// Parse an existing reference, rejecting anything that is not `xxxxxx.ext`.
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        if Self::looks_like(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(DomainError::malformed(
                "short reference",
                format!("`{value}` is not six lowercase alphanumerics plus an extension"),
            ))
        }
    }

    /// Cheap shape check used by the sanitizer and resolver.
    pub fn looks_like(value: &str) -> bool {
        let Some((stem, extension)) = value.split_once('.') else {
            return false;
        };
        stem.len() == REFERENCE_STEM_LEN
            && stem
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            && (2..=4).contains(&extension.len())
            && extension
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn stem(&self) -> &str {
        self.0.split_once('.').map(|(stem, _)| stem).unwrap_or(&self.0)
    }

    pub fn extension(&self) -> &str {
        self.0.split_once('.').map(|(_, ext)| ext).unwrap_or_default()
    }
}

impl fmt::Display for ShortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ShortRef {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ShortRef {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ShortRef> for String {
    fn from(value: ShortRef) -> Self {
        value.0
    }
}

/// Reasons a data URI could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataUriError {
    #[error("missing `data:` scheme")]
    MissingScheme,
    #[error("missing `,` between header and payload")]
    MissingSeparator,
    #[error("payload is not declared as base64")]
    NotBase64,
    #[error("unrecognised mime type `{mime}`")]
    InvalidMime { mime: String },
    #[error("payload is empty")]
    EmptyPayload,
    #[error("payload is not valid base64: {message}")]
    InvalidBase64 { message: String },
}

/// Binary payload with its declared mime type.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Payload {
    mime: String,
    bytes: Bytes,
}

impl Payload {
    pub fn new(mime: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let mime = mime.into().trim().to_ascii_lowercase();
        Self {
            mime,
            bytes: bytes.into(),
        }
    }

    /// Decode a `data:<mime>;base64,<payload>` literal.
    pub fn from_data_uri(uri: &str) -> Result<Self, DataUriError> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or(DataUriError::MissingScheme)?;
        let (header, data) = rest
            .split_once(',')
            .ok_or(DataUriError::MissingSeparator)?;

        let mut parameters = header.split(';');
        let mime = parameters.next().unwrap_or_default().trim();
        if !parameters.any(|parameter| parameter.eq_ignore_ascii_case("base64")) {
            return Err(DataUriError::NotBase64);
        }
        if !is_mime_shape(mime) {
            return Err(DataUriError::InvalidMime {
                mime: mime.to_string(),
            });
        }

        let compact: String = data.chars().filter(|ch| !ch.is_whitespace()).collect();
        if compact.is_empty() {
            return Err(DataUriError::EmptyPayload);
        }

        let bytes = LENIENT_BASE64
            .decode(compact.as_bytes())
            .map_err(|err| DataUriError::InvalidBase64 {
                message: err.to_string(),
            })?;
        if bytes.is_empty() {
            return Err(DataUriError::EmptyPayload);
        }

        Ok(Self::new(mime, bytes))
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hex-encoded SHA-256 of the payload bytes.
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes).as_slice())
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl TryFrom<String> for Payload {
    type Error = DataUriError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_data_uri(&value)
    }
}

impl From<Payload> for String {
    fn from(value: Payload) -> Self {
        value.to_data_uri()
    }
}

fn is_mime_shape(mime: &str) -> bool {
    let Some((kind, subtype)) = mime.split_once('/') else {
        return false;
    };
    let valid = |part: &str| {
        !part.is_empty()
            && part
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'+' | b'-'))
    };
    valid(kind) && valid(subtype)
}

/// Where an attachment's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum AttachmentSource {
    /// Stored in the blob store under the attachment's reference.
    #[default]
    Stored,
    /// Carried inline on the attachment record itself.
    Inline(Payload),
}

/// File owned by a document, created on extraction or explicit upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedFile {
    pub reference: ShortRef,
    pub original_name: String,
    pub mime: String,
    pub size_bytes: u64,
    pub checksum: String,
    #[serde(default)]
    pub source: AttachmentSource,
}

impl AttachedFile {
    /// Attachment whose bytes were written to the blob store.
    pub fn stored(reference: ShortRef, original_name: impl Into<String>, payload: &Payload) -> Self {
        Self {
            reference,
            original_name: original_name.into(),
            mime: payload.mime().to_string(),
            size_bytes: payload.len() as u64,
            checksum: payload.checksum(),
            source: AttachmentSource::Stored,
        }
    }

    /// Attachment carrying its payload inline.
    pub fn inline(reference: ShortRef, original_name: impl Into<String>, payload: Payload) -> Self {
        let mut file = Self::stored(reference, original_name, &payload);
        file.source = AttachmentSource::Inline(payload);
        file
    }

    pub fn inline_payload(&self) -> Option<&Payload> {
        match &self.source {
            AttachmentSource::Inline(payload) => Some(payload),
            AttachmentSource::Stored => None,
        }
    }

    /// True when this record already describes the given payload.
    pub fn matches_payload(&self, checksum: &str, payload: &Payload) -> bool {
        self.checksum == checksum || self.inline_payload() == Some(payload)
    }

    /// True when `name` is this attachment's reference or original file name.
    pub fn matches_name(&self, name: &str) -> bool {
        self.reference.as_str() == name || self.original_name == name
    }
}
