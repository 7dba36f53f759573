//! URL templates with `{name}` placeholders

use reqwest::Url;
use serde::Deserialize;

/// A URL with `{name}` placeholders, e.g. `{base}/items/{key}?from={start}`.
///
/// The template starts with `{base}`. Everything after it is split into path
/// segments and query pairs, so `url` percent-encodes the substituted values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct UrlTemplate(String);

/// A template that cannot produce a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    MissingBase,
    InvalidBase(String),
    UnknownPlaceholder(String),
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingBase => f.write_str("template must start with {base}"),
            Self::InvalidBase(reason) => write!(f, "invalid base URL: {reason}"),
            Self::UnknownPlaceholder(name) => write!(f, "unknown placeholder {{{name}}}"),
        }
    }
}

impl std::error::Error for TemplateError {}

const BASE: &str = "{base}";

impl UrlTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_base(&self) -> bool {
        self.0.starts_with(BASE)
    }

    /// Placeholder names in order of appearance
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut rest = self.0.as_str();
        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else { break };
            names.push(&after[..close]);
            rest = &after[close + 1..];
        }
        names
    }

    /// Placeholders not in `allowed`
    pub fn unknown_placeholders(&self, allowed: &[&str]) -> Vec<String> {
        self.placeholders()
            .into_iter()
            .filter(|name| *name != "base" && !allowed.contains(name))
            .map(String::from)
            .collect()
    }

    /// Build the request URL from `base` and the placeholder values
    pub fn render(&self, base: &str, vars: &[(&str, &str)]) -> Result<Url, TemplateError> {
        let rest = self.0.strip_prefix(BASE).ok_or(TemplateError::MissingBase)?;
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let mut url = Url::parse(base).map_err(|e| TemplateError::InvalidBase(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| TemplateError::InvalidBase(format!("{base} cannot carry a path")))?;
            segments.pop_if_empty();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                segments.push(&fill(segment, vars)?);
            }
        }

        if let Some(query) = query {
            let mut pairs = url.query_pairs_mut();
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some((name, value)) => {
                        pairs.append_pair(&fill(name, vars)?, &fill(value, vars)?);
                    }
                    None => {
                        pairs.append_key_only(&fill(pair, vars)?);
                    }
                }
            }
        }
        Ok(url)
    }
}

/// Substitute the raw values into one path segment or query component
fn fill(part: &str, vars: &[(&str, &str)]) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(part.len());
    let mut rest = part;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            rest = &rest[open..];
            break;
        };
        let name = &after[..close];
        let (_, value) = vars
            .iter()
            .find(|(k, _)| *k == name)
            .ok_or_else(|| TemplateError::UnknownPlaceholder(name.to_string()))?;
        out.push_str(value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_placeholders() {
        let t = UrlTemplate::new("{base}/items/{key}?from={start}&to={end}");
        let url = t
            .render(
                "https://registry.example/api/",
                &[("key", "42"), ("start", "2025-01-01"), ("end", "2025-01-31")],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://registry.example/api/items/42?from=2025-01-01&to=2025-01-31"
        );
    }

    #[test]
    fn encodes_values() {
        let t = UrlTemplate::new("{base}/owner/{key}?c={category}");
        let url = t
            .render("http://h", &[("key", "a/b c"), ("category", "a b&c/d")])
            .unwrap();
        assert_eq!(url.path(), "/owner/a%2Fb%20c");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("c".to_string(), "a b&c/d".to_string())]);
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let t = UrlTemplate::new("{base}/{missing}/x");
        assert_eq!(
            t.render("http://h", &[]),
            Err(TemplateError::UnknownPlaceholder("missing".into()))
        );
    }

    #[test]
    fn requires_base_prefix() {
        let t = UrlTemplate::new("http://h/{key}");
        assert!(!t.has_base());
        assert_eq!(t.render("http://h", &[("key", "1")]), Err(TemplateError::MissingBase));
    }

    #[test]
    fn invalid_base_rejected() {
        let t = UrlTemplate::new("{base}/x");
        assert!(matches!(t.render("not a url", &[]), Err(TemplateError::InvalidBase(_))));
    }

    #[test]
    fn key_only_query_kept() {
        let t = UrlTemplate::new("{base}/codes?all");
        assert_eq!(t.render("http://h", &[]).unwrap().as_str(), "http://h/codes?all");
    }

    #[test]
    fn lists_placeholders() {
        let t = UrlTemplate::new("{base}/{category}/{subtype}?o={cursor}");
        assert_eq!(t.placeholders(), vec!["base", "category", "subtype", "cursor"]);
        assert_eq!(t.unknown_placeholders(&["category", "cursor"]), vec!["subtype"]);
    }
}
