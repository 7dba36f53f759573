//! Raw response payloads and their export shape

use serde::{Deserialize, Serialize};

/// Artifact format a payload is exported as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    /// Structured records, exported as one JSON array
    Json,
    /// Raw markup strings, exported concatenated with a separator comment
    Xml,
}

impl Shape {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Xml => "xml",
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// One response body as returned by a registry endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Xml(String),
}

impl Payload {
    /// Classify a text body: valid JSON stays structured, anything else is raw markup.
    pub fn from_text(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Xml(text),
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Self::Json(_) => Shape::Json,
            Self::Xml(_) => Shape::Xml,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Xml(_) => None,
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}
