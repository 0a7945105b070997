use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::json;

use ventas_ai::StaticLlmClient;
use ventas_api::app::{AppServices, Clients, assemble, build_app};
use ventas_infra::AppConfig;
use ventas_infra::conversations::InMemoryConversationStore;
use ventas_infra::external::RecordingMessagingClient;
use ventas_infra::queue::{InMemoryQueueStore, QueueStore};
use ventas_infra::webhook::sign_payload;
use ventas_queue::{QueueItem, QueueItemType};

struct TestServer {
    base_url: String,
    config: AppConfig,
    services: Arc<AppServices>,
    messaging: Arc<RecordingMessagingClient>,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(StaticLlmClient::new("¡Hola! Te comparto los precios.", 0.9, 0.1)).await
    }

    async fn spawn_with(llm: StaticLlmClient) -> Self {
        let config = AppConfig::default_for_test();
        let messaging = Arc::new(RecordingMessagingClient::new());
        let services = Arc::new(assemble(
            &config,
            InMemoryQueueStore::arc(),
            InMemoryConversationStore::arc(),
            Clients {
                llm: Arc::new(llm),
                messaging: messaging.clone(),
            },
        ));

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(services.clone(), &config.admin_token);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            config,
            services,
            messaging,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_webhook(&self, body: &serde_json::Value) -> reqwest::Response {
        let bytes = serde_json::to_vec(body).unwrap();
        let signature = sign_payload(&self.config.webhook_secret, &bytes);
        self.client
            .post(self.url("/webhooks/messages"))
            .header("X-Signature", signature)
            .header("Content-Type", "application/json")
            .body(bytes)
            .send()
            .await
            .unwrap()
    }

    async fn admin_get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(&self.config.admin_token)
            .send()
            .await
            .unwrap()
    }

    async fn admin_post(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(&self.config.admin_token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn process(&self) -> serde_json::Value {
        let res = self.admin_post("/queue/process", json!({})).await;
        assert_eq!(res.status(), StatusCode::OK);
        res.json().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn message(conversation: &str, message_id: &str, text: &str) -> serde_json::Value {
    json!({
        "event": "message_received",
        "conversation_id": conversation,
        "customer_id": "cust-1",
        "message_id": message_id,
        "text": text
    })
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn operator_endpoints_require_the_admin_token() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/queue/stats")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv
        .client
        .get(srv.url("/queue/stats"))
        .bearer_auth("not-the-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv.admin_get("/queue/stats").await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn bad_signature_is_rejected_and_nothing_is_queued() {
    let srv = TestServer::spawn().await;
    let bytes = serde_json::to_vec(&message("conv-1", "m-1", "hola")).unwrap();

    let res = srv
        .client
        .post(srv.url("/webhooks/messages"))
        .header("X-Signature", sign_payload("wrong-secret", &bytes))
        .body(bytes.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    let res = srv
        .client
        .post(srv.url("/webhooks/messages"))
        .body(bytes)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let stats: serde_json::Value = srv.admin_get("/queue/stats").await.json().await.unwrap();
    assert_eq!(stats["total"], 0);
}

#[tokio::test]
async fn invalid_payload_is_a_bad_request() {
    let srv = TestServer::spawn().await;

    let res = srv
        .post_webhook(&json!({"event": "message_received", "conversation_id": "conv-1"}))
        .await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn blank_message_text_is_rejected_before_queueing() {
    let srv = TestServer::spawn().await;

    let res = srv.post_webhook(&message("conv-1", "m-1", "   ")).await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
    let stats: serde_json::Value = srv.admin_get("/queue/stats").await.json().await.unwrap();
    assert_eq!(stats["total"], 0);
}

#[tokio::test]
async fn message_is_accepted_then_answered_by_the_bot() {
    let srv = TestServer::spawn().await;

    let res = srv
        .post_webhook(&message("conv-1", "m-1", "¿cuánto cuesta el plan pro?"))
        .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let receipt: serde_json::Value = res.json().await.unwrap();
    assert_eq!(receipt["accepted"], 1);
    let item_id = receipt["item_ids"][0].as_str().unwrap().to_string();

    let report = srv.process().await;
    assert_eq!(report["completed"], 1);

    let item: serde_json::Value = srv
        .admin_get(&format!("/queue/items/{item_id}"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(item["status"], "completed");
    assert_eq!(item["type"], "process_message");
    assert_eq!(item["attempts"], 1);

    let messages: serde_json::Value = srv
        .admin_get("/conversations/conv-1/messages")
        .await
        .json()
        .await
        .unwrap();
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["direction"], "inbound");
    assert_eq!(messages[1]["sender"], "bot");
    assert_eq!(
        srv.messaging.sent_texts(),
        vec!["¡Hola! Te comparto los precios.".to_string()]
    );
}

#[tokio::test]
async fn handoff_request_escalates_and_is_audited() {
    let srv = TestServer::spawn().await;

    srv.post_webhook(&message("conv-7", "m-1", "quiero hablar con un humano"))
        .await;
    srv.process().await;

    let conversation: serde_json::Value = srv
        .admin_get("/conversations/conv-7")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(conversation["status"], "escalated");
    assert_eq!(conversation["human_took_over"], true);

    let audit: serde_json::Value = srv
        .admin_get("/conversations/conv-7/escalations")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(audit.as_array().unwrap().len(), 1);
    assert_eq!(audit[0]["reason"], "explicit_request");
    assert!(srv.messaging.sent_texts().is_empty());

    // A second message while a human owns the conversation gets no bot reply.
    srv.post_webhook(&message("conv-7", "m-2", "¿hola?")).await;
    srv.process().await;
    assert!(srv.messaging.sent_texts().is_empty());

    let res = srv
        .admin_post("/conversations/conv-7/release", json!({}))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let released: serde_json::Value = res.json().await.unwrap();
    assert_eq!(released["human_took_over"], false);
}

#[tokio::test]
async fn assign_and_close_conversation() {
    let srv = TestServer::spawn().await;
    srv.post_webhook(&message("conv-3", "m-1", "hola")).await;
    srv.process().await;

    let res = srv
        .admin_post("/conversations/conv-3/assign", json!({"agent_id": "agent-42"}))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let assigned: serde_json::Value = res.json().await.unwrap();
    assert_eq!(assigned["assigned_to"], "agent-42");
    assert_eq!(assigned["human_took_over"], true);

    let res = srv.admin_post("/conversations/conv-3/close", json!({})).await;
    assert_eq!(res.status(), StatusCode::OK);
    let closed: serde_json::Value = res.json().await.unwrap();
    assert_eq!(closed["status"], "closed");

    let res = srv
        .admin_post("/conversations/conv-3/assign", json!({"agent_id": "agent-43"}))
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = srv.admin_get("/conversations/nobody").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dead_lettered_item_can_be_retried_by_an_operator() {
    let srv = TestServer::spawn().await;
    let broken = QueueItem::new(QueueItemType::ProcessMessage, json!({"unexpected": true}));
    let id = srv.services.queue.enqueue(broken).await.unwrap();

    let report = srv.process().await;
    assert_eq!(report["failed"], 1);

    let failed: serde_json::Value = srv
        .admin_get("/queue/items?status=failed")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(failed.as_array().unwrap().len(), 1);
    assert!(failed[0]["last_error"].as_str().unwrap().contains("invalid"));

    let res = srv
        .admin_post(&format!("/queue/items/{id}/retry"), json!({}))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let retried: serde_json::Value = res.json().await.unwrap();
    assert_eq!(retried["status"], "pending");
    assert_eq!(retried["attempts"], 0);

    // Only failed items can be retried.
    let res = srv
        .admin_post(&format!("/queue/items/{id}/retry"), json!({}))
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn queue_inspection_validates_input() {
    let srv = TestServer::spawn().await;

    assert_eq!(
        srv.admin_get("/queue/items?status=exploded").await.status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        srv.admin_get("/queue/items/not-a-uuid").await.status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        srv.admin_get("/queue/items/0190b5f2-7a1c-7000-8000-000000000000")
            .await
            .status(),
        StatusCode::NOT_FOUND
    );

    let res = srv.admin_post("/queue/cleanup", json!({})).await;
    assert_eq!(res.status(), StatusCode::OK);
    let report: serde_json::Value = res.json().await.unwrap();
    assert_eq!(report["purged"], 0);
}
