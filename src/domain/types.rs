//! Shared domain enumerations.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Draft,
    Scheduled,
    Published,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Scheduled => "scheduled",
            DocumentStatus::Published => "published",
        }
    }
}

impl TryFrom<&str> for DocumentStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "draft" => Ok(DocumentStatus::Draft),
            "scheduled" => Ok(DocumentStatus::Scheduled),
            "published" => Ok(DocumentStatus::Published),
            _ => Err(()),
        }
    }
}
