#[cfg(test)]
mod tests {
    use crate::agent::manifest::PrecacheManifest;
    use crate::agent::memory::MemoryCacheStore;
    use crate::agent::testing::StubNetwork;
    use crate::server::{CONTROL_PATH, create_app};
    use crate::{AgentConfig, AgentState, AppState};
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode, header};
    use axum::response::Response;
    use fincache_proto::{ControlReply, StatusReport};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn create_test_state() -> (AppState, Arc<StubNetwork>) {
        let network = Arc::new(StubNetwork::new());
        network.ok("/", "text/html", b"<html>home</html>");
        network.ok("/manifest.json", "application/json", b"{\"name\":\"Finance\"}");

        let mut config = AgentConfig::from_lookup(|_| None).unwrap();
        config.cache_version = "v1".to_string();
        config.precache = PrecacheManifest::from_csv("/,/manifest.json");

        let state = Arc::new(AgentState::new(
            config,
            Arc::new(MemoryCacheStore::new()),
            network.clone(),
        ));
        state.install_configured().await.unwrap();
        (state, network)
    }

    async fn send(state: &AppState, request: Request<Body>) -> Response {
        create_app(state.clone()).oneshot(request).await.unwrap()
    }

    async fn get(state: &AppState, uri: &str) -> Response {
        send(state, Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn control(state: &AppState, json: &str) -> (StatusCode, ControlReply) {
        let request = Request::post(CONTROL_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap();
        let response = send(state, request).await;
        let status = response.status();
        let reply = ControlReply::from_json(&body_string(response).await).unwrap();
        (status, reply)
    }

    fn status_of(reply: ControlReply) -> StatusReport {
        match reply {
            ControlReply::Status(report) => report,
            other => panic!("expected status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_proxies_online_requests() {
        let (state, network) = create_test_state().await;
        network.ok("/api/categories", "application/json", b"[\"food\"]");

        let response = get(&state, "/api/categories").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "[\"food\"]");
    }

    #[tokio::test]
    async fn test_sensitive_route_offline_returns_503() {
        let (state, network) = create_test_state().await;
        network.set_offline(true);

        let response = get(&state, "/api/transactions?month=2024-05").await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
        let value: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(value["offline"], true);
    }

    #[tokio::test]
    async fn test_precached_page_served_offline() {
        let (state, network) = create_test_state().await;
        network.set_offline(true);

        let request = Request::get("/")
            .header(header::ACCEPT, "text/html")
            .body(Body::empty())
            .unwrap();
        let response = send(&state, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "<html>home</html>");
    }

    #[tokio::test]
    async fn test_uncached_navigation_offline_gets_offline_page() {
        let (state, network) = create_test_state().await;
        network.set_offline(true);

        let request = Request::get("/budgets/")
            .header("sec-fetch-mode", "navigate")
            .body(Body::empty())
            .unwrap();
        let response = send(&state, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("Try again"));
    }

    #[tokio::test]
    async fn test_unrecoverable_failure_is_bad_gateway() {
        let (state, network) = create_test_state().await;
        network.set_offline(true);

        let response = get(&state, "/robots.txt").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_foreign_authority_target_is_rejected() {
        let (state, network) = create_test_state().await;
        let before = network.calls();

        let response = get(&state, "//evil.example/logo.png").await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(network.calls(), before);
    }

    #[tokio::test]
    async fn test_dot_segment_alias_of_sensitive_route_is_not_cached() {
        let (state, network) = create_test_state().await;
        network.ok("/api/transactions", "application/json", b"[{\"amount\":12}]");

        let response = get(&state, "/_next/static/../../api/transactions").await;
        assert_eq!(response.status(), StatusCode::OK);

        network.set_offline(true);
        let response = get(&state, "/_next/static/../../api/transactions").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body_string(response).await.contains("amount"));
    }

    #[tokio::test]
    async fn test_post_is_forwarded_with_body() {
        let (state, network) = create_test_state().await;
        network.ok("/api/categories", "application/json", b"{\"id\":3}");

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/categories")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"name\":\"travel\"}"))
            .unwrap();
        let response = send(&state, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(network.requested().contains(&"POST /api/categories".to_string()));
    }

    #[tokio::test]
    async fn test_control_post_status_and_clear() {
        let (state, _) = create_test_state().await;

        let (status, reply) = control(&state, r#"{"type":"QueryStatus"}"#).await;
        assert_eq!(status, StatusCode::OK);
        let report = status_of(reply);
        assert_eq!(report.generation_name.as_deref(), Some("fincache-v1"));
        assert_eq!(report.entry_count, 2);

        let (_, reply) = control(&state, r#"{"type":"ClearCache"}"#).await;
        assert!(matches!(reply, ControlReply::CacheCleared { removed: 2, .. }));

        let (_, reply) = control(&state, r#"{"type":"QueryStatus"}"#).await;
        assert_eq!(status_of(reply).entry_count, 0);
    }

    #[tokio::test]
    async fn test_control_post_error_reply() {
        let (state, network) = create_test_state().await;
        network.set_offline(true);

        let (status, reply) = control(&state, r#"{"type":"InstallUpdate","version":"v2"}"#).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(matches!(reply, ControlReply::Error { .. }));
    }

    #[tokio::test]
    async fn test_control_post_rejects_unknown_message() {
        let (state, _) = create_test_state().await;

        let request = Request::post(CONTROL_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"type":"FormatDisk"}"#))
            .unwrap();
        let response = send(&state, request).await;
        assert!(response.status().is_client_error());
    }
}
