//! Integration tests for the Chat Relay Gateway
//!
//! The gateway runs on a loopback port in front of a mock LLM API

use reqwest::Method;
use serde_json::{Value, json};
use std::collections::HashMap;
use wiremock::matchers::{any, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wizard_gateway::client::GatewayClient;
use wizard_gateway::config::GatewayConfig;
use wizard_gateway::relay::{AppState, router};

fn config(pairs: &[(&str, &str)]) -> GatewayConfig {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    GatewayConfig::from_lookup(move |key: &str| map.get(key).cloned()).unwrap()
}

async fn spawn_gateway(config: GatewayConfig) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(AppState::new(config));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn configured_gateway(upstream: &MockServer) -> String {
    spawn_gateway(config(&[
        ("LLM_BASE_URL", upstream.uri().as_str()),
        ("LLM_API_KEY", "secret"),
        ("LLM_AGENT_ID", "default-agent"),
    ]))
    .await
}

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_configuration() {
        let upstream = MockServer::start().await;
        let gateway = configured_gateway(&upstream).await;

        let body: Value = reqwest::get(format!("{gateway}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["status"], "ok");
        assert_eq!(body["configured"], true);
        assert_eq!(body["agentId"], "configured");
        assert_eq!(body["baseUrl"], upstream.uri());
    }

    #[tokio::test]
    async fn test_health_without_credentials() {
        let gateway = spawn_gateway(config(&[])).await;
        let body: Value = reqwest::get(format!("{gateway}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["configured"], false);
        assert_eq!(body["agentId"], "not set");
    }
}

mod chat_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_injects_credentials_and_default_agent() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chats"))
            .and(header("authorization", "TD1 secret"))
            .and(header("content-type", "application/vnd.api+json"))
            .and(body_partial_json(json!({
                "data": { "attributes": { "agentId": "default-agent" } }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "data": { "id": "c1" } })))
            .expect(1)
            .mount(&upstream)
            .await;
        let gateway = configured_gateway(&upstream).await;

        let response = reqwest::Client::new()
            .post(format!("{gateway}/api/chats"))
            .body(r#"{"data":{"type":"chats","attributes":{}}}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["data"]["id"], "c1");
        upstream.verify().await;
    }

    #[tokio::test]
    async fn test_missing_credential_is_configuration_error() {
        let upstream = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&upstream)
            .await;
        let gateway = spawn_gateway(config(&[("LLM_BASE_URL", upstream.uri().as_str())])).await;

        let response = reqwest::Client::new()
            .post(format!("{gateway}/api/chats"))
            .body("{}")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 500);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["kind"], "configuration");
        assert!(!body["message"].as_str().unwrap().contains("secret"));
        upstream.verify().await;
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_proxy_error() {
        let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_url = format!("http://{}", closed.local_addr().unwrap());
        drop(closed);
        let gateway =
            spawn_gateway(config(&[("LLM_BASE_URL", dead_url.as_str()), ("LLM_API_KEY", "secret")])).await;

        let response = reqwest::Client::new()
            .post(format!("{gateway}/api/chats"))
            .body("{}")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 500);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Proxy error");
    }

    #[tokio::test]
    async fn test_upstream_errors_pass_through() {
        let upstream = MockServer::start().await;
        let error_body = r#"{"errors":[{"title":"agent not found"}]}"#;
        Mock::given(method("POST"))
            .and(path("/api/chats/c9/continue"))
            .respond_with(
                ResponseTemplate::new(422).set_body_raw(error_body, "application/vnd.api+json"),
            )
            .mount(&upstream)
            .await;
        let gateway = configured_gateway(&upstream).await;

        let response = reqwest::Client::new()
            .post(format!("{gateway}/api/chats/c9/continue"))
            .body(r#"{"input":"hi"}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 422);
        assert_eq!(
            response.headers()["content-type"],
            "application/vnd.api+json"
        );
        assert_eq!(response.text().await.unwrap(), error_body);
    }

    #[tokio::test]
    async fn test_event_stream_is_relayed() {
        let upstream = MockServer::start().await;
        let events = "data: {\"content\":\"Hel\"}\n\ndata: {\"content\":\"lo\"}\n\ndata: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/api/chats/c1/continue"))
            .and(header("accept", "text/event-stream"))
            .and(body_partial_json(json!({ "input": "hi" })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(events, "text/event-stream"))
            .expect(1)
            .mount(&upstream)
            .await;
        let gateway = configured_gateway(&upstream).await;

        let response = reqwest::Client::new()
            .post(format!("{gateway}/api/chats/c1/continue"))
            .header("accept", "text/event-stream")
            .header("content-type", "application/json")
            .body(r#"{"input":"hi"}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(response.headers()["cache-control"], "no-cache");
        assert_eq!(response.text().await.unwrap(), events);
        upstream.verify().await;
    }

    #[tokio::test]
    async fn test_encoded_chat_id_cannot_leave_continue_route() {
        let upstream = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&upstream)
            .await;
        let gateway = configured_gateway(&upstream).await;

        for chat_id in ["..%5Cadmin%5Cagents", "c1%5C..%5C..%5Cusers", "c1.json"] {
            let response = reqwest::Client::new()
                .post(format!("{gateway}/api/chats/{chat_id}/continue"))
                .body(r#"{"input":"hi"}"#)
                .send()
                .await
                .unwrap();

            assert_eq!(response.status().as_u16(), 400, "chat id {chat_id}");
            let body: Value = response.json().await.unwrap();
            assert_eq!(body["kind"], "invalid_request");
        }
        upstream.verify().await;
    }

    #[tokio::test]
    async fn test_buffered_reply_keeps_content_type() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chats/c1/continue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "content": "done" })))
            .mount(&upstream)
            .await;
        let gateway = configured_gateway(&upstream).await;

        let response = reqwest::Client::new()
            .post(format!("{gateway}/api/chats/c1/continue"))
            .header("accept", "application/json")
            .body(r#"{"input":"hi"}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(response.headers()["content-type"], "application/json");
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["content"], "done");
    }

    #[tokio::test]
    async fn test_client_through_gateway() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chats"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "data": { "id": "c7" } })))
            .expect(1)
            .mount(&upstream)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chats/c7/continue"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"text\":\"relayed \"}\n\ndata: {\"content\":\"reply\"}\n\ndata: [DONE]\n\n",
                "text/event-stream",
            ))
            .expect(1)
            .mount(&upstream)
            .await;
        let gateway = configured_gateway(&upstream).await;

        let client = GatewayClient::new(gateway);
        let reply = client.send_message("hi", |_, _| {}).await.unwrap();

        assert_eq!(reply, "relayed reply");
        upstream.verify().await;
    }
}

mod surface_tests {
    use super::*;

    #[tokio::test]
    async fn test_preflight_answers_no_content() {
        let gateway = spawn_gateway(config(&[])).await;

        for route in ["/api/chats", "/api/community/publish", "/api/presence"] {
            let response = reqwest::Client::new()
                .request(Method::OPTIONS, format!("{gateway}{route}"))
                .header("origin", "http://localhost:8080")
                .header("access-control-request-method", "POST")
                .send()
                .await
                .unwrap();

            assert_eq!(response.status().as_u16(), 204, "route {route}");
            assert_eq!(response.headers()["access-control-allow-origin"], "*");
        }
    }

    #[tokio::test]
    async fn test_cors_headers_on_regular_responses() {
        let gateway = spawn_gateway(config(&[])).await;
        let response = reqwest::Client::new()
            .get(format!("{gateway}/health"))
            .header("origin", "http://localhost:8080")
            .send()
            .await
            .unwrap();
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_presence_endpoints() {
        let gateway = spawn_gateway(config(&[])).await;
        let client = reqwest::Client::new();
        let url = format!("{gateway}/api/presence");

        for (session, action) in [("a", "join"), ("b", "join"), ("a", "leave")] {
            let body: Value = client
                .post(&url)
                .json(&json!({ "sessionId": session, "action": action }))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(body["sessionId"], session);
        }

        let body: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
        assert_eq!(body["count"], 1);

        let missing = client.post(&url).json(&json!({ "action": "join" })).send().await.unwrap();
        assert_eq!(missing.status().as_u16(), 400);
        let body: Value = missing.json().await.unwrap();
        assert_eq!(body["error"], "sessionId required");

        for action in [json!(null), json!("refresh")] {
            let body: Value = client
                .post(&url)
                .json(&json!({ "sessionId": "c", "action": action }))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(body["count"], 2);
        }
        let body: Value = client
            .post(&url)
            .json(&json!({ "sessionId": "d" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["count"], 3);

        let wrong = client.delete(&url).send().await.unwrap();
        assert_eq!(wrong.status().as_u16(), 405);
    }

    #[tokio::test]
    async fn test_static_files_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>wizard</h1>").unwrap();
        let static_dir = dir.path().to_string_lossy().to_string();
        let gateway = spawn_gateway(config(&[("STATIC_DIR", static_dir.as_str())])).await;

        let response = reqwest::get(format!("{gateway}/")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "<h1>wizard</h1>");

        let missing = reqwest::get(format!("{gateway}/nope.js")).await.unwrap();
        assert_eq!(missing.status().as_u16(), 404);
    }
}
