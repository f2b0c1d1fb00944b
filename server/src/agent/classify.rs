//! Request classification into caching-policy buckets

use crate::agent::AgentRequest;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// The bucket a request is sorted into for caching-policy purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceClass {
    StaticAsset,
    Image,
    Font,
    SafeApi,
    SensitiveApi,
    HtmlPage,
    Default,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::StaticAsset => "static-asset",
            ResourceClass::Image => "image",
            ResourceClass::Font => "font",
            ResourceClass::SafeApi => "safe-api",
            ResourceClass::SensitiveApi => "sensitive-api",
            ResourceClass::HtmlPage => "html-page",
            ResourceClass::Default => "default",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule looks at
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Regular expression over the request path
    Path(Regex),
    /// Literal path prefix
    PathPrefix(String),
    /// Final path segment extension, compared case-insensitively
    Extension(Vec<String>),
    /// Path ends in `/` or `.html`
    DocumentPath,
    /// Navigation request, or `Accept` declares `text/html`
    DeclaresHtml,
}

impl Matcher {
    fn matches(&self, request: &AgentRequest) -> bool {
        let path = request.path();
        match self {
            Matcher::Path(pattern) => pattern.is_match(path),
            Matcher::PathPrefix(prefix) => path.starts_with(prefix.as_str()),
            Matcher::Extension(extensions) => extension(path)
                .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))),
            Matcher::DocumentPath => {
                path.ends_with('/') || path.to_ascii_lowercase().ends_with(".html")
            }
            Matcher::DeclaresHtml => request.is_navigation() || request.accepts_html(),
        }
    }
}

fn extension(path: &str) -> Option<&str> {
    let last_segment = path.rsplit('/').next()?;
    let (_, ext) = last_segment.rsplit_once('.')?;
    Some(ext)
}

/// A single `{pattern, resulting class}` pair
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub matcher: Matcher,
    pub class: ResourceClass,
}

impl ClassificationRule {
    pub fn new(matcher: Matcher, class: ResourceClass) -> Self {
        Self { matcher, class }
    }
}

/// Ordered rule list; the first matching rule decides
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<ClassificationRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// The finance tracker's rule table
    ///
    /// Sensitive API routes are listed before safe ones, and any API route
    /// not explicitly declared safe is treated as sensitive.
    pub fn standard() -> Self {
        Self::new(vec![
            ClassificationRule::new(
                api_route(&["subscriptions", "transactions", "auth"]),
                ResourceClass::SensitiveApi,
            ),
            ClassificationRule::new(
                api_route(&["categories", "ping", "health"]),
                ResourceClass::SafeApi,
            ),
            ClassificationRule::new(
                Matcher::Path(case_insensitive(r"^/api(/|$)")),
                ResourceClass::SensitiveApi,
            ),
            ClassificationRule::new(
                Matcher::PathPrefix("/_next/static/".to_string()),
                ResourceClass::StaticAsset,
            ),
            ClassificationRule::new(
                Matcher::Extension(owned(&["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"])),
                ResourceClass::Image,
            ),
            ClassificationRule::new(
                Matcher::Extension(owned(&["woff", "woff2", "eot", "ttf", "otf"])),
                ResourceClass::Font,
            ),
            ClassificationRule::new(Matcher::DocumentPath, ResourceClass::HtmlPage),
            ClassificationRule::new(Matcher::DeclaresHtml, ResourceClass::HtmlPage),
        ])
    }

    /// Classify a request. Unmatched requests are `Default`.
    pub fn classify(&self, request: &AgentRequest) -> ResourceClass {
        let class = self
            .rules
            .iter()
            .find(|rule| rule.matcher.matches(request))
            .map(|rule| rule.class)
            .unwrap_or(ResourceClass::Default);
        debug!("Classified {} {} as {}", request.method, request.path(), class);
        class
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// `/api/<resource>` and anything below it
fn api_route(resources: &[&str]) -> Matcher {
    Matcher::Path(case_insensitive(&format!(
        r"^/api/({})(/|$)",
        resources.join("|")
    )))
}

fn case_insensitive(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){}", pattern)).expect("built-in classification pattern")
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
