//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use ledger::InMemoryLedger;
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::SettlementConfig;
use serde_json::{Value, json};
use tower::ServiceExt;
use webhook::SignatureVerifier;

const SECRET: &str = "test-secret";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestServer {
    app: axum::Router,
    state: api::DefaultState<InMemoryLedger>,
}

impl TestServer {
    fn new() -> Self {
        let ledger = InMemoryLedger::new();
        let state = api::create_default_state(
            ledger,
            SettlementConfig::default(),
            Some(SECRET.to_string()),
        );
        let app = api::create_app(state.state.clone(), get_metrics_handle());
        Self { app, state }
    }

    async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn deliver_webhook(&self, body: Value, signature: Option<&str>) -> (StatusCode, Value) {
        let raw = body.to_string();
        let signature = match signature {
            Some(sig) => sig.to_string(),
            None => SignatureVerifier::new(SECRET).sign(raw.as_bytes()).unwrap(),
        };
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/esp")
            .header("content-type", "application/json")
            .header("x-esp-signature", signature)
            .body(Body::from(raw))
            .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn create_deal(&self) -> String {
        let (status, body) = self
            .request(
                "POST",
                "/deals",
                Some(json!({
                    "total_price_minor": 10_000_000,
                    "total_commission_minor": 300_000,
                    "recipients": [
                        {
                            "role": "agent",
                            "name": "Lead Agent",
                            "tax_id": "1234567890",
                            "percent_bps": 6000
                        },
                        {
                            "role": "agency",
                            "name": "Agency",
                            "tax_id": "0987654321",
                            "percent_bps": 4000
                        }
                    ]
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["deal_id"].as_str().unwrap().to_string()
    }

    /// Drives a deal through signatures and invoice creation.
    async fn invoiced_deal(&self) -> String {
        let deal_id = self.create_deal().await;
        let (status, _) = self
            .request("POST", &format!("/deals/{deal_id}/submit"), None)
            .await;
        assert_eq!(status, StatusCode::OK);

        let uuid = uuid::Uuid::parse_str(&deal_id).unwrap();
        self.state
            .esign
            .set_all_signed(common::AggregateId::from_uuid(uuid), true);
        let (status, _) = self
            .request("POST", &format!("/deals/{deal_id}/sign"), None)
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = self
            .request("POST", &format!("/deals/{deal_id}/invoice"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["payment_url"].as_str().is_some());
        deal_id
    }

    async fn pay_deal(&self, deal_id: &str) {
        let (status, body) = self
            .deliver_webhook(
                json!({
                    "event_id": format!("evt-pay-{deal_id}"),
                    "event": "deal.paid",
                    "order_id": deal_id,
                    "transaction_id": "txn-1",
                    "amount": 300_000,
                }),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "processed");
    }
}

#[tokio::test]
async fn health_check() {
    let server = TestServer::new();
    let (status, body) = server.request("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn metrics_endpoint_renders() {
    let server = TestServer::new();
    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_and_fetch_deal() {
    let server = TestServer::new();
    let deal_id = server.create_deal().await;

    let (status, body) = server.request("GET", &format!("/deals/{deal_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "draft");
    assert_eq!(body["total_commission_minor"], 300_000);
    assert_eq!(body["recipients"].as_array().unwrap().len(), 2);
    // 60/40 split of the commission
    assert_eq!(body["recipients"][0]["amount_minor"], 180_000);
    assert_eq!(body["recipients"][1]["amount_minor"], 120_000);
}

#[tokio::test]
async fn unknown_deal_is_404() {
    let server = TestServer::new();
    let (status, _) = server
        .request(
            "GET",
            &format!("/deals/{}", uuid::Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_deal_id_is_400() {
    let server = TestServer::new();
    let (status, _) = server.request("GET", "/deals/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn illegal_transition_is_409() {
    let server = TestServer::new();
    let deal_id = server.create_deal().await;
    // Draft deals cannot be invoiced
    let (status, _) = server
        .request("POST", &format!("/deals/{deal_id}/invoice"), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .request("POST", &format!("/deals/{deal_id}/act-signed"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn full_settlement_over_http() {
    let server = TestServer::new();
    let deal_id = server.invoiced_deal().await;
    server.pay_deal(&deal_id).await;

    let (status, body) = server.request("GET", &format!("/deals/{deal_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "hold_period");

    // Manual release before the hold elapses needs force
    let (status, body) = server
        .request(
            "POST",
            &format!("/deals/{deal_id}/release"),
            Some(json!({ "force": true })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], true);
    assert_eq!(body["status"], "closed");
}

#[tokio::test]
async fn deal_history_lists_every_fact() {
    let server = TestServer::new();
    let deal_id = server.invoiced_deal().await;

    let (status, body) = server
        .request("GET", &format!("/deals/{deal_id}/events"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let events: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert_eq!(events[0], "DealCreated");
    assert!(events.contains(&"InvoiceCreated"));
}

#[tokio::test]
async fn deal_list_reflects_board_projection() {
    let server = TestServer::new();
    let deal_id = server.create_deal().await;

    let (status, body) = server.request("GET", "/deals", None).await;
    assert_eq!(status, StatusCode::OK);
    let deals = body.as_array().unwrap();
    assert_eq!(deals.len(), 1);
    assert_eq!(deals[0]["deal_id"], deal_id);
}

#[tokio::test]
async fn webhook_with_bad_signature_is_401() {
    let server = TestServer::new();
    let (status, _) = server
        .deliver_webhook(json!({ "event": "deal.paid" }), Some("deadbeef"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_without_signature_is_401() {
    let server = TestServer::new();
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/esp")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = server.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unrecognized_webhook_is_acknowledged() {
    let server = TestServer::new();
    let (status, body) = server
        .deliver_webhook(json!({ "event_id": "evt-x", "event": "kyc.updated" }), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "ignored");
}

#[tokio::test]
async fn duplicate_webhook_short_circuits() {
    let server = TestServer::new();
    let deal_id = server.invoiced_deal().await;
    let event = json!({
        "event_id": "evt-dup",
        "event": "deal.paid",
        "order_id": deal_id,
        "transaction_id": "txn-1",
        "amount": 300_000,
    });

    let (_, body) = server.deliver_webhook(event.clone(), None).await;
    assert_eq!(body["outcome"], "processed");

    let (status, body) = server.deliver_webhook(event, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "duplicate");
}

#[tokio::test]
async fn malformed_webhook_is_acknowledged_and_dead_lettered() {
    let server = TestServer::new();
    let raw = b"definitely not json".to_vec();
    let signature = SignatureVerifier::new(SECRET).sign(&raw).unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/esp")
        .header("content-type", "application/json")
        .header("x-esp-signature", signature)
        .body(Body::from(raw))
        .unwrap();

    let response = server.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["outcome"], "failed");

    let (status, dlq) = server.request("GET", "/dlq", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dlq.as_array().unwrap().len(), 1);
    assert_eq!(dlq[0]["event_type"], "malformed");
}

#[tokio::test]
async fn failed_webhook_lands_in_dlq_and_can_be_resolved() {
    let server = TestServer::new();
    let deal_id = server.invoiced_deal().await;

    // Paid event with no transaction id fails dispatch
    let (status, body) = server
        .deliver_webhook(
            json!({
                "event_id": "evt-bad",
                "event": "deal.paid",
                "order_id": deal_id,
                "amount": 300_000,
            }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "failed");
    let entry_id = body["dlq_entry_id"].as_str().unwrap().to_string();

    let (status, body) = server.request("GET", "/dlq", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], entry_id);
    assert_eq!(body[0]["deal_id"], deal_id);

    let (status, _) = server
        .request(
            "POST",
            &format!("/dlq/{entry_id}/resolve"),
            Some(json!({ "notes": "bank confirmed no payment" })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = server.request("GET", "/dlq", None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn dispute_locks_release_endpoint() {
    let server = TestServer::new();
    let deal_id = server.invoiced_deal().await;
    server.pay_deal(&deal_id).await;

    let (_, deal) = server.request("GET", &format!("/deals/{deal_id}"), None).await;
    let initiator = deal["recipients"][0]["party_id"].as_str().unwrap();

    let (status, body) = server
        .request(
            "POST",
            &format!("/deals/{deal_id}/disputes"),
            Some(json!({ "initiator": initiator, "reason": "work not delivered" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "dispute");

    let (status, _) = server
        .request(
            "POST",
            &format!("/deals/{deal_id}/release"),
            Some(json!({ "force": true })),
        )
        .await;
    assert_eq!(status, StatusCode::LOCKED);

    let (status, body) = server
        .request(
            "POST",
            &format!("/deals/{deal_id}/disputes/resolve"),
            Some(json!({ "resolution": "no_refund" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "hold_period");
}
