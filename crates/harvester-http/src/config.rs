//! `[registry]` configuration: endpoint URL templates, JSON pointers, credentials

use std::sync::Arc;
use std::time::Duration;

use harvester_core::DetailEndpoint;
use harvester_pipeline::{ConfigError, Registry};
use serde::Deserialize;

use crate::client::{BasicAuth, ClientError, HttpClient};
use crate::endpoints::{HttpDetail, HttpList, HttpReference};
use crate::pointer::JsonPointerExtractor;
use crate::template::UrlTemplate;

const LIST_PLACEHOLDERS: &[&str] = &["category", "subtype", "cursor", "page_size"];
const DETAIL_PLACEHOLDERS: &[&str] = &["key", "context", "start", "end"];

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Substituted for `{base}` in every URL template
    pub base_url: String,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default = "default_max_idle")]
    pub max_idle_per_host: usize,
    pub reference: ReferenceConfig,
    pub list: ListConfig,
    /// Item details carrying the ids to resolve
    pub resolve: DetailConfig,
    /// Pointer (with `*` wildcards) to the resolved ids in a `resolve` response
    pub id_pointer: String,
    pub item_details: DetailConfig,
    pub resolved_details: [DetailConfig; 2],
}

fn default_max_idle() -> usize {
    8
}

/// Basic-auth credentials; values may be `${VAR}` references
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default, deserialize_with = "deserialize_env_var")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "deserialize_env_var")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceConfig {
    pub operation: String,
    pub url: UrlTemplate,
    /// Pointer to the combination entries, e.g. `/codes/*`
    pub combinations_pointer: String,
    /// Pointers relative to one entry
    pub category_pointer: String,
    pub subtype_pointer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListConfig {
    pub operation: String,
    /// Placeholders: `{category}`, `{subtype}`, `{cursor}`, `{page_size}`
    pub url: UrlTemplate,
    /// Pointer to the item keys, e.g. `/items/*/id`
    pub items_pointer: String,
    #[serde(default)]
    pub next_cursor_pointer: Option<String>,
    #[serde(default)]
    pub continuation_pointer: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailConfig {
    pub operation: String,
    /// Placeholders: `{key}`, `{context}`, `{start}`, `{end}`
    pub url: UrlTemplate,
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
pub fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

/// Failure turning a [`RegistryConfig`] into live endpoints
#[derive(Debug)]
pub enum SetupError {
    Config(ConfigError),
    Client(ClientError),
}

impl std::fmt::Display for SetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::Client(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SetupError {}

impl From<ConfigError> for SetupError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ClientError> for SetupError {
    fn from(e: ClientError) -> Self {
        Self::Client(e)
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: format!("registry.{field}"),
        reason: reason.into(),
    }
}

fn check_pointer(field: &str, pointer: &str) -> Result<(), ConfigError> {
    if pointer.is_empty() || pointer.starts_with('/') {
        Ok(())
    } else {
        Err(invalid(field, format!("JSON pointer '{pointer}' must start with '/'")))
    }
}

fn check_template(field: &str, template: &UrlTemplate, allowed: &[&str]) -> Result<(), ConfigError> {
    if !template.has_base() {
        return Err(invalid(field, "must start with {base}"));
    }
    match template.unknown_placeholders(allowed).as_slice() {
        [] => Ok(()),
        unknown => Err(invalid(
            field,
            format!("unknown placeholder(s) {{{}}}", unknown.join("}, {")),
        )),
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(invalid("base_url", "must be an http(s) URL"));
        }
        if self.max_idle_per_host == 0 {
            return Err(invalid("max_idle_per_host", "must be at least 1"));
        }
        check_template("reference.url", &self.reference.url, &[])?;
        check_pointer("reference.combinations_pointer", &self.reference.combinations_pointer)?;
        check_pointer("reference.category_pointer", &self.reference.category_pointer)?;
        check_pointer("reference.subtype_pointer", &self.reference.subtype_pointer)?;

        check_template("list.url", &self.list.url, LIST_PLACEHOLDERS)?;
        check_pointer("list.items_pointer", &self.list.items_pointer)?;
        if let Some(p) = &self.list.next_cursor_pointer {
            check_pointer("list.next_cursor_pointer", p)?;
        }
        if let Some(p) = &self.list.continuation_pointer {
            check_pointer("list.continuation_pointer", p)?;
        }

        check_pointer("id_pointer", &self.id_pointer)?;
        check_template("resolve.url", &self.resolve.url, DETAIL_PLACEHOLDERS)?;
        check_template("item_details.url", &self.item_details.url, DETAIL_PLACEHOLDERS)?;
        for (i, detail) in self.resolved_details.iter().enumerate() {
            check_template(&format!("resolved_details[{i}].url"), &detail.url, DETAIL_PLACEHOLDERS)?;
        }
        Ok(())
    }

    /// Resolved credentials; an `[registry.auth]` section with an unset
    /// `${VAR}` is a missing credential
    pub fn credentials(&self) -> Result<Option<BasicAuth>, ConfigError> {
        let Some(auth) = &self.auth else {
            return Ok(None);
        };
        let username = auth
            .username
            .clone()
            .ok_or_else(|| ConfigError::MissingCredential("registry.auth.username".into()))?;
        let password = auth
            .password
            .clone()
            .ok_or_else(|| ConfigError::MissingCredential("registry.auth.password".into()))?;
        Ok(Some(BasicAuth { username, password }))
    }

    /// Build every collaborator over one shared client
    pub fn build(&self, per_request_timeout: Duration) -> Result<Registry, SetupError> {
        self.validate()?;
        let auth = self.credentials()?;
        let client = HttpClient::new(per_request_timeout, auth, self.max_idle_per_host)?;
        let base = self.base_url.as_str();
        let detail = |config: &DetailConfig| -> Arc<dyn DetailEndpoint> {
            Arc::new(HttpDetail::new(client.clone(), base, config.clone()))
        };

        log::debug!("Registry endpoints configured against {base}");
        Ok(Registry {
            reference: Arc::new(HttpReference::new(client.clone(), base, self.reference.clone())),
            list: Arc::new(HttpList::new(client.clone(), base, self.list.clone())),
            resolve: detail(&self.resolve),
            extractor: Arc::new(JsonPointerExtractor::new(&self.id_pointer)),
            item_details: detail(&self.item_details),
            resolved_details: [
                detail(&self.resolved_details[0]),
                detail(&self.resolved_details[1]),
            ],
        })
    }
}
