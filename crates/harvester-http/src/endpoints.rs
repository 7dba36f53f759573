//! Registry collaborators over HTTP GET + JSON

use std::collections::BTreeSet;

use harvester_core::{
    Combination, Cursor, DetailEndpoint, DetailRequest, FetchError, ItemKey, ListEndpoint, Page,
    Payload, Position, ReferenceList, ReferenceSource,
};
use serde_json::Value;

use crate::client::HttpClient;
use crate::config::{DetailConfig, ListConfig, ReferenceConfig};
use crate::pointer::{scalar_string, select};
use crate::template::TemplateError;

fn invalid_request(operation: &str) -> impl Fn(TemplateError) -> FetchError + '_ {
    move |e| FetchError::InvalidRequest(format!("{operation}: {e}"))
}

fn json_body<'a>(operation: &str, payload: &'a Payload) -> Result<&'a Value, FetchError> {
    payload
        .as_json()
        .ok_or_else(|| FetchError::Unparseable(format!("{operation}: expected a JSON body")))
}

fn first_scalar(value: &Value, pointer: &str) -> Option<String> {
    select(value, pointer).into_iter().find_map(scalar_string)
}

// =============================================================================
// Reference combinations
// =============================================================================

pub struct HttpReference {
    client: HttpClient,
    base: String,
    config: ReferenceConfig,
}

impl HttpReference {
    pub fn new(client: HttpClient, base: impl Into<String>, config: ReferenceConfig) -> Self {
        Self {
            client,
            base: base.into(),
            config,
        }
    }
}

impl ReferenceSource for HttpReference {
    fn operation(&self) -> &str {
        &self.config.operation
    }

    fn list_combinations(&self) -> Result<ReferenceList, FetchError> {
        let url = self
            .config
            .url
            .render(&self.base, &[])
            .map_err(invalid_request(&self.config.operation))?;
        let payload = self.client.get(url)?;
        let combinations = parse_combinations(&payload, &self.config)?;
        Ok(ReferenceList {
            combinations,
            raw: Some(payload),
        })
    }
}

/// Combinations in response order, duplicates and incomplete entries dropped
pub fn parse_combinations(
    payload: &Payload,
    config: &ReferenceConfig,
) -> Result<Vec<Combination>, FetchError> {
    let body = json_body(&config.operation, payload)?;
    let mut seen = BTreeSet::new();
    let mut combinations = Vec::new();
    let mut incomplete = 0usize;
    for entry in select(body, &config.combinations_pointer) {
        let category = first_scalar(entry, &config.category_pointer);
        let subtype = first_scalar(entry, &config.subtype_pointer);
        let (Some(category), Some(subtype)) = (category, subtype) else {
            incomplete += 1;
            continue;
        };
        let combo = Combination::new(category, subtype);
        if seen.insert(combo.clone()) {
            combinations.push(combo);
        }
    }
    if incomplete > 0 {
        log::warn!("{}: skipped {incomplete} entries without category/subtype", config.operation);
    }
    Ok(combinations)
}

// =============================================================================
// Paginated listing
// =============================================================================

pub struct HttpList {
    client: HttpClient,
    base: String,
    config: ListConfig,
}

impl HttpList {
    pub fn new(client: HttpClient, base: impl Into<String>, config: ListConfig) -> Self {
        Self {
            client,
            base: base.into(),
            config,
        }
    }
}

impl ListEndpoint for HttpList {
    fn operation(&self) -> &str {
        &self.config.operation
    }

    fn fetch_page(
        &self,
        combo: &Combination,
        cursor: &Cursor,
        page_size: usize,
    ) -> Result<Page, FetchError> {
        let cursor_param = cursor_param(cursor, &self.config);
        let page_size_param = page_size.to_string();
        let url = self
            .config
            .url
            .render(
                &self.base,
                &[
                    ("category", combo.category_code.as_str()),
                    ("subtype", combo.subtype_code.as_str()),
                    ("cursor", cursor_param.as_str()),
                    ("page_size", page_size_param.as_str()),
                ],
            )
            .map_err(invalid_request(&self.config.operation))?;
        let payload = self.client.get(url)?;
        parse_page(payload, cursor, page_size, &self.config)
    }
}

/// Offset paging starts at 0; token paging sends an empty token first
fn cursor_param(cursor: &Cursor, config: &ListConfig) -> String {
    match cursor.position() {
        Some(Position::Offset(n)) => n.to_string(),
        Some(Position::Token(t)) => t.clone(),
        None if config.next_cursor_pointer.is_some() => String::new(),
        None => "0".to_string(),
    }
}

/// Decode one list response.
///
/// With `next_cursor_pointer` the server hands out the next cursor (string
/// token or numeric offset) and its absence ends paging. Without it, paging
/// is by offset and a short page ends paging. `continuation_pointer`, when
/// set, overrides either rule.
pub fn parse_page(
    payload: Payload,
    cursor: &Cursor,
    page_size: usize,
    config: &ListConfig,
) -> Result<Page, FetchError> {
    let body = json_body(&config.operation, &payload)?;
    let items: Vec<ItemKey> = select(body, &config.items_pointer)
        .into_iter()
        .filter_map(scalar_string)
        .map(ItemKey)
        .collect();

    let (next_cursor, more) = match &config.next_cursor_pointer {
        Some(pointer) => match select(body, pointer).into_iter().next() {
            Some(Value::String(t)) if !t.is_empty() => {
                (Cursor::at(Position::Token(t.clone())), true)
            }
            Some(Value::Number(n)) => match n.as_u64() {
                Some(offset) => (Cursor::at(Position::Offset(offset)), true),
                None => (cursor.clone(), false),
            },
            _ => (cursor.clone(), false),
        },
        None => {
            let offset = match cursor.position() {
                Some(Position::Offset(n)) => *n,
                _ => 0,
            };
            (
                Cursor::at(Position::Offset(offset + items.len() as u64)),
                items.len() >= page_size,
            )
        }
    };

    let continuation = match &config.continuation_pointer {
        Some(pointer) => select(body, pointer)
            .into_iter()
            .next()
            .and_then(Value::as_bool)
            .unwrap_or(false),
        None => more,
    };

    Ok(Page {
        items,
        continuation,
        next_cursor,
        raw: Some(payload),
    })
}

// =============================================================================
// Detail lookups
// =============================================================================

pub struct HttpDetail {
    client: HttpClient,
    base: String,
    config: DetailConfig,
}

impl HttpDetail {
    pub fn new(client: HttpClient, base: impl Into<String>, config: DetailConfig) -> Self {
        Self {
            client,
            base: base.into(),
            config,
        }
    }

    pub fn url_for(&self, request: &DetailRequest) -> Result<reqwest::Url, TemplateError> {
        let (start, end) = request
            .period
            .map(|p| (p.start.to_string(), p.end.to_string()))
            .unwrap_or_default();
        let context = request.context.clone().unwrap_or_default();
        self.config.url.render(
            &self.base,
            &[
                ("key", request.key.as_str()),
                ("context", context.as_str()),
                ("start", start.as_str()),
                ("end", end.as_str()),
            ],
        )
    }
}

impl DetailEndpoint for HttpDetail {
    fn operation(&self) -> &str {
        &self.config.operation
    }

    fn fetch(&self, request: &DetailRequest) -> Result<Payload, FetchError> {
        let url = self
            .url_for(request)
            .map_err(invalid_request(&self.config.operation))?;
        self.client.get(url)
    }
}
