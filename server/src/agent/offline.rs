//! Synthesized responses for when neither the network nor the cache can help

use crate::agent::{AgentRequest, AgentResponse};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};

pub const SENSITIVE_OFFLINE_MESSAGE: &str =
    "Offline: financial data is never stored on this device and is unavailable until you reconnect";
pub const LIMITED_OFFLINE_MESSAGE: &str = "Offline: limited functionality until you reconnect";

/// Self-contained offline document for a navigation request
///
/// The page needs no further network or cache access: styles and the retry
/// script are inline.
pub fn respond_offline(request: &AgentRequest) -> AgentResponse {
    let target = escape_html(retry_target(request.target()));
    let body = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline</title>
<style>
  body {{ font-family: system-ui, sans-serif; display: flex; min-height: 100vh; margin: 0;
         align-items: center; justify-content: center; background: #f8fafc; color: #0f172a; }}
  main {{ max-width: 28rem; padding: 2rem; text-align: center; }}
  button {{ font: inherit; padding: 0.6rem 1.4rem; border: 0; border-radius: 0.5rem;
           background: #2563eb; color: #fff; cursor: pointer; }}
</style>
</head>
<body>
<main>
  <h1>You're offline</h1>
  <p>This page isn't available without a connection. Your financial data is not stored on this device.</p>
  <button type="button" data-target="{target}" onclick="window.location.assign(this.dataset.target)">Try again</button>
</main>
</body>
</html>
"#
    );

    let mut headers = no_store_headers();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    AgentResponse::new(StatusCode::OK, headers, body)
}

/// Structured 503 telling the caller the data is missing because it is offline
pub fn offline_json(message: &str) -> AgentResponse {
    let body = serde_json::json!({
        "error": message,
        "offline": true,
    })
    .to_string();

    let mut headers = no_store_headers();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    AgentResponse::new(StatusCode::SERVICE_UNAVAILABLE, headers, body)
}

// Retry only ever reloads a same-origin path
fn retry_target(target: &str) -> &str {
    if target.starts_with('/') && !target.starts_with("//") {
        target
    } else {
        "/"
    }
}

fn no_store_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            c => escaped.push(c),
        }
    }
    escaped
}
