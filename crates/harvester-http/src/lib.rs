//! HTTP/JSON registry client
//!
//! Implements the harvest collaborators (reference source, paginated list,
//! detail lookups, id extraction) over configurable URL templates and JSON
//! pointers, so registry-specific layout lives in configuration.

pub mod client;
pub mod config;
pub mod endpoints;
pub mod pointer;
pub mod template;

pub use client::{BasicAuth, ClientError, HttpClient};
pub use config::{AuthConfig, DetailConfig, ListConfig, ReferenceConfig, RegistryConfig, SetupError};
pub use endpoints::{HttpDetail, HttpList, HttpReference};
pub use pointer::JsonPointerExtractor;
pub use template::{TemplateError, UrlTemplate};
