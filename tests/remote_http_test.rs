//! HttpRemote over the real network transport, against a wiremock server.

use reqwest::Url;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

use quote_sync::intercept::NetworkFetcher;
use quote_sync::model::{FailureKind, QuotePayload, QuoteStatus, RecordId};
use quote_sync::remote::{HttpRemote, QuoteRemote, RemoteError};

async fn setup() -> (MockServer, HttpRemote) {
    let server = MockServer::start().await;
    let base = Url::parse(&format!("{}/", server.uri())).unwrap();
    let transport = NetworkFetcher::new(Duration::from_secs(5)).unwrap();
    (server, HttpRemote::new(base, Arc::new(transport)))
}

#[tokio::test]
async fn create_posts_camel_case_payload_and_returns_id() {
    let (server, remote) = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/quotes"))
        .and(body_partial_json(json!({
            "product": "Widget",
            "quantity": 5,
            "desiredPackaging": "crate",
            "status": "pending"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "id": 42})))
        .expect(1)
        .mount(&server)
        .await;

    let mut payload = QuotePayload::new("Widget", 5);
    payload.desired_packaging = "crate".into();
    assert_eq!(remote.create(&payload).await.unwrap(), 42);
}

#[tokio::test]
async fn update_and_delete_target_the_record_path() {
    let (server, remote) = setup().await;
    Mock::given(method("PUT"))
        .and(path("/api/quotes/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/quotes/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    remote
        .update(7, &QuotePayload::new("Box", 1))
        .await
        .unwrap();
    remote.delete(7).await.unwrap();
}

#[tokio::test]
async fn unusable_answers_are_rejections() {
    let (server, remote) = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/quotes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/quotes/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "error": "locked"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/quotes/1"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let err = remote.create(&QuotePayload::new("x", 1)).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Rejected);

    let err = remote
        .update(1, &QuotePayload::new("x", 1))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RemoteError::Rejected {
            status: 200,
            message: "locked".into()
        }
    );

    let err = remote.delete(1).await.unwrap_err();
    assert!(matches!(err, RemoteError::Rejected { status: 404, .. }));
}

#[tokio::test]
async fn list_decodes_quotes() {
    let (server, remote) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/quotes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 3,
                "product": "Pallet",
                "quantity": 12,
                "desiredPackaging": "shrink wrap",
                "estimatedPrice": 99.5,
                "notes": "",
                "status": "approved",
                "createdAt": "2024-05-01T10:00:00Z"
            }
        ])))
        .mount(&server)
        .await;

    let quotes = remote.list().await.unwrap();
    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes[0].id, RecordId::Remote(3));
    assert_eq!(quotes[0].status, QuoteStatus::Approved);
    assert_eq!(quotes[0].estimated_price, 99.5);
}

#[tokio::test]
async fn unreachable_server_is_a_connectivity_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let base = Url::parse(&format!("http://{}/", addr)).unwrap();

    let transport = NetworkFetcher::new(Duration::from_secs(2)).unwrap();
    let remote = HttpRemote::new(base, Arc::new(transport));
    let err = remote.list().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Connectivity);
}
