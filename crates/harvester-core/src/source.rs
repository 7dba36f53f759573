//! Registry-facing collaborator traits and the identifiers they exchange
//!
//! The orchestrator only ever talks to a registry through these traits, so
//! wire framing, authentication and schema knowledge live in implementations.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::error::{ExtractionError, FetchError};
use crate::payload::Payload;

/// Reference-data partition key (category × subtype) scoping one listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Combination {
    pub category_code: String,
    pub subtype_code: String,
}

impl Combination {
    pub fn new(category_code: impl Into<String>, subtype_code: impl Into<String>) -> Self {
        Self {
            category_code: category_code.into(),
            subtype_code: subtype_code.into(),
        }
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category_code, self.subtype_code)
    }
}

/// Item identifier discovered by listing (primary map key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey(pub String);

/// Identifier discovered later, inside an item's detail record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResolvedId(pub String);

/// Primary map value: the category the item was first listed under
pub type PrimaryValue = String;

impl ItemKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ResolvedId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ResolvedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for ResolvedId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Primary entry a resolved id was discovered from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceRef {
    pub key: ItemKey,
    pub value: PrimaryValue,
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.key, self.value)
    }
}

/// Inclusive date range some detail endpoints report over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Stage 0 result: the combinations plus the raw response they came from
#[derive(Debug, Clone)]
pub struct ReferenceList {
    pub combinations: Vec<Combination>,
    pub raw: Option<Payload>,
}

/// One page of a listing
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<ItemKey>,
    /// Server says more pages follow
    pub continuation: bool,
    /// Where the next page starts; only meaningful with `continuation`
    pub next_cursor: Cursor,
    pub raw: Option<Payload>,
}

/// Input of a per-item detail fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailRequest {
    pub key: String,
    /// Secondary selector, e.g. the category an item was listed under
    pub context: Option<String>,
    pub period: Option<Period>,
}

impl DetailRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            context: None,
            period: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_period(mut self, period: Option<Period>) -> Self {
        self.period = period;
        self
    }
}

impl fmt::Display for DetailRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)?;
        if let Some(ctx) = &self.context {
            write!(f, " ({ctx})")?;
        }
        if let Some(period) = &self.period {
            write!(f, " [{period}]")?;
        }
        Ok(())
    }
}

/// Reference data endpoint (Stage 0). Not paginated.
pub trait ReferenceSource: Send + Sync {
    /// Operation class name, used for rate limiting and as buffer category
    fn operation(&self) -> &str;

    fn list_combinations(&self) -> Result<ReferenceList, FetchError>;
}

/// Paginated listing endpoint (Stage 1)
pub trait ListEndpoint: Send + Sync {
    fn operation(&self) -> &str;

    fn fetch_page(
        &self,
        combination: &Combination,
        cursor: &Cursor,
        page_size: usize,
    ) -> Result<Page, FetchError>;
}

/// Per-item detail endpoint (Stages 2–5)
pub trait DetailEndpoint: Send + Sync {
    fn operation(&self) -> &str;

    fn fetch(&self, request: &DetailRequest) -> Result<Payload, FetchError>;
}

/// Pulls resolved ids out of a detail payload.
///
/// Returns every id in the payload or an error; never a partial list.
pub trait IdExtractor: Send + Sync {
    fn extract(&self, payload: &Payload) -> Result<Vec<ResolvedId>, ExtractionError>;
}
