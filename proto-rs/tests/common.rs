use fincache_proto::*;

// Commands paired with the JSON the hosting application sends for them
pub fn sample_messages() -> Vec<(&'static str, ControlMessage)> {
    vec![
        (r#"{"type":"ClearCache"}"#, ControlMessage::ClearCache { prefix: None }),
        (
            r#"{"type":"ClearCache","prefix":"/api/categories"}"#,
            ControlMessage::ClearCache {
                prefix: Some("/api/categories".to_string()),
            },
        ),
        (r#"{"type":"QueryStatus"}"#, ControlMessage::QueryStatus),
        (r#"{"type":"SkipWaiting"}"#, ControlMessage::SkipWaiting),
        (
            r#"{"type":"InstallUpdate","version":"v2"}"#,
            ControlMessage::InstallUpdate {
                version: "v2".to_string(),
            },
        ),
    ]
}

// A cached stylesheet response with a binary-ish body
pub fn sample_snapshot() -> ResponseSnapshot {
    ResponseSnapshot::new(
        200,
        vec![
            ("content-type".to_string(), "text/css".to_string()),
            ("etag".to_string(), "\"abc123\"".to_string()),
        ],
        b"body{margin:0}\x00\xff".to_vec(),
    )
}
