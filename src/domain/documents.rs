//! Documents and their localized metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::attachments::AttachedFile;
use super::types::DocumentStatus;

const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Text that is either a single string or one string per language code.
///
/// Stored documents carry both shapes; callers resolve once at the document
/// boundary through [`Document::localized`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalizedText {
    PlainText(String),
    ByLanguage(BTreeMap<String, String>),
}

impl LocalizedText {
    /// Pick the first preferred language present, then any value at all.
    pub fn resolve<'a>(&'a self, preferred: &[String]) -> &'a str {
        match self {
            LocalizedText::PlainText(text) => text,
            LocalizedText::ByLanguage(values) => preferred
                .iter()
                .find_map(|language| values.get(language))
                .or_else(|| values.values().next())
                .map(String::as_str)
                .unwrap_or_default(),
        }
    }
}

impl From<&str> for LocalizedText {
    fn from(value: &str) -> Self {
        LocalizedText::PlainText(value.to_string())
    }
}

impl Default for LocalizedText {
    fn default() -> Self {
        LocalizedText::PlainText(String::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawLanguages {
    Joined(String),
    List(Vec<String>),
}

/// Language codes of a document, primary first.
///
/// Accepts a single code, a comma-joined list or a JSON array on input and
/// always serializes as an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawLanguages", into = "Vec<String>")]
pub struct Languages(Vec<String>);

impl Languages {
    pub fn parse(raw: &str) -> Self {
        Self::from_codes(raw.split(','))
    }

    fn from_codes<'a>(codes: impl IntoIterator<Item = &'a str>) -> Self {
        let mut normalized: Vec<String> = Vec::new();
        for code in codes {
            let code = code.trim().to_ascii_lowercase();
            if !code.is_empty() && !normalized.contains(&code) {
                normalized.push(code);
            }
        }
        if normalized.is_empty() {
            normalized.push(DEFAULT_LANGUAGE.to_string());
        }
        Self(normalized)
    }

    pub fn primary(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or(DEFAULT_LANGUAGE)
    }

    pub fn codes(&self) -> &[String] {
        &self.0
    }
}

impl Default for Languages {
    fn default() -> Self {
        Self(vec![DEFAULT_LANGUAGE.to_string()])
    }
}

impl From<RawLanguages> for Languages {
    fn from(value: RawLanguages) -> Self {
        match value {
            RawLanguages::Joined(joined) => Self::parse(&joined),
            RawLanguages::List(list) => Self::from_codes(list.iter().map(String::as_str)),
        }
    }
}

impl From<Languages> for Vec<String> {
    fn from(value: Languages) -> Self {
        value.0
    }
}

/// Title and excerpt resolved for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalizedDocument {
    pub language: String,
    pub title: String,
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: LocalizedText,
    #[serde(default)]
    pub excerpt: Option<LocalizedText>,
    pub body: String,
    #[serde(default)]
    pub status: DocumentStatus,
    #[serde(default)]
    pub attachments: Vec<AttachedFile>,
    #[serde(default)]
    pub languages: Languages,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Document {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: DocumentId::new(),
            title: LocalizedText::PlainText(title.into()),
            excerpt: None,
            body: body.into(),
            status: DocumentStatus::Draft,
            attachments: Vec::new(),
            languages: Languages::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn attachment(&self, name: &str) -> Option<&AttachedFile> {
        self.attachments.iter().find(|file| file.matches_name(name))
    }

    /// Append attachments, skipping references or payloads already present.
    ///
    /// Returns the number of records actually added.
    pub fn merge_attachments(&mut self, incoming: impl IntoIterator<Item = AttachedFile>) -> usize {
        let mut added = 0;
        for file in incoming {
            let duplicate = self.attachments.iter().any(|existing| {
                existing.reference == file.reference || existing.checksum == file.checksum
            });
            if !duplicate {
                self.attachments.push(file);
                added += 1;
            }
        }
        added
    }

    pub fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }

    /// Resolve title and excerpt for `language`, falling back to the document's
    /// own language list.
    pub fn localized(&self, language: Option<&str>) -> LocalizedDocument {
        let mut preferred: Vec<String> = Vec::new();
        if let Some(language) = language {
            preferred.push(language.trim().to_ascii_lowercase());
        }
        preferred.extend(self.languages.codes().iter().cloned());

        LocalizedDocument {
            language: preferred
                .first()
                .cloned()
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            title: self.title.resolve(&preferred).to_string(),
            excerpt: self
                .excerpt
                .as_ref()
                .map(|excerpt| excerpt.resolve(&preferred).to_string()),
        }
    }
}
