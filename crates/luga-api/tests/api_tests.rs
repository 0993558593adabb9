//! API integration tests.
//!
//! The router runs against a wiremock Firestore emulator and wiremock
//! providers; object storage is an in-memory stub.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use hmac::{Hmac, Mac};
use secrecy::SecretString;
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use luga_api::{create_router, ApiConfig, AppState, Providers};
use luga_clients::{
    ChatClient, ChatConfig, ElevenLabsClient, ElevenLabsConfig, IdentityClient, IdentityConfig, MailConfig, Mailer, StripeClient,
    StripeConfig, SyncClient, SyncConfig,
};
use luga_firestore::{FirestoreClient, FirestoreConfig};
use luga_models::{MediaKind, StorageProvider, StoredObject};
use luga_storage::{ObjectStore, StorageResult};

const DOCS: &str = "/v1/projects/test/databases/(default)/documents";
const STRIPE_SECRET: &str = "whsec_test";

/// Keeps uploads in memory.
#[derive(Default)]
struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn provider(&self) -> StorageProvider {
        StorageProvider::Cloudinary
    }

    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
        _kind: MediaKind,
    ) -> StorageResult<StoredObject> {
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(StoredObject {
            key: key.to_string(),
            url: format!("https://media.test/{}", key),
            provider: StorageProvider::Cloudinary,
        })
    }

    async fn delete(&self, key: &str, _kind: MediaKind) -> StorageResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn url_for(&self, key: &str, _kind: MediaKind) -> StorageResult<String> {
        Ok(format!("https://media.test/{}", key))
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        Ok(())
    }
}

struct TestApp {
    router: Router,
    state: AppState,
    firestore: MockServer,
    providers: MockServer,
}

async fn test_app() -> TestApp {
    let firestore = MockServer::start().await;
    let providers_server = MockServer::start().await;
    let base = providers_server.uri();

    let client = FirestoreClient::new(FirestoreConfig::emulator("test", firestore.address().to_string()))
        .await
        .unwrap();

    let providers = Providers {
        chat: ChatClient::new(ChatConfig::default()),
        elevenlabs: ElevenLabsClient::new(ElevenLabsConfig {
            api_key: SecretString::from("el-key"),
            base_url: base.clone(),
        }),
        sync: SyncClient::new(SyncConfig {
            api_key: SecretString::from("sync-key"),
            base_url: base.clone(),
            webhook_secret: Some(SecretString::from("sync-secret")),
        }),
        stripe: StripeClient::new(StripeConfig {
            api_key: SecretString::from("sk_test"),
            webhook_secret: Some(SecretString::from(STRIPE_SECRET)),
            frontend_url: "http://localhost:3000".to_string(),
            base_url: base.clone(),
        }),
        mailer: Mailer::new(MailConfig::disabled()).unwrap(),
        identity: Arc::new(IdentityClient::new(IdentityConfig {
            google_client_id: None,
            google_certs_url: format!("{}/certs", base),
            facebook_graph_url: base,
        })),
    };

    let config = ApiConfig {
        jwt_secret: SecretString::from("integration-secret"),
        lipsync_poller_enabled: false,
        ..ApiConfig::default()
    };
    let state = AppState::assemble(config, client, Arc::new(MemoryStore::default()), providers);
    let router = create_router(state.clone(), None);

    TestApp {
        router,
        state,
        firestore,
        providers: providers_server,
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn stripe_signature(payload: &str, timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(STRIPE_SECRET.as_bytes()).unwrap();
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn test_root_welcome() {
    let app = test_app().await;
    let response = app.router.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["message"], "Welcome to the LuGaAI API");
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app().await;
    let response = app.router.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_protected_route_requires_token() {
    let app = test_app().await;
    let response = app.router.oneshot(get("/api/user/me")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["detail"], "Not authenticated");
}

#[tokio::test]
async fn test_garbage_token_rejected() {
    let app = test_app().await;
    let request = Request::builder()
        .uri("/api/text/conversations")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_placeholder_png() {
    let app = test_app().await;
    let response = app.router.oneshot(get("/api/video/placeholder/0/5000")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
}

#[tokio::test]
async fn test_conversation_blocked_without_text_quota() {
    let app = test_app().await;
    Mock::given(method("GET"))
        .and(path(format!("{}/users/u1", DOCS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "projects/test/databases/(default)/documents/users/u1",
            "fields": {
                "email": {"stringValue": "a@b.c"},
                "quota": {"mapValue": {"fields": {
                    "text_quota": {"integerValue": "0"},
                    "audio_quota": {"integerValue": "0"},
                    "video_quota": {"integerValue": "0"},
                    "process_video_quota": {"integerValue": "0"}
                }}}
            },
            "updateTime": "2025-01-01T00:00:00Z"
        })))
        .mount(&app.firestore)
        .await;

    let token = app.state.tokens.access_token("u1", "a@b.c").unwrap();
    let mut request = post_json("/api/text/conversation", json!({"prompt": "hello"}));
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, format!("Bearer {}", token).parse().unwrap());
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["code"], "quota_exceeded");
}

#[tokio::test]
async fn test_register_duplicate_email() {
    let app = test_app().await;
    // Email index already claimed.
    Mock::given(method("POST"))
        .and(path_regex(r"/documents/user_emails$"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&app.firestore)
        .await;

    let response = app
        .router
        .oneshot(post_json(
            "/api/user/register",
            json!({"email": "taken@example.com", "password": "Sup3rSecret!", "username": "taken"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Email already exists.");
}

#[tokio::test]
async fn test_stripe_webhook_requires_signature() {
    let app = test_app().await;
    let response = app
        .router
        .oneshot(post_json("/api/stripe/stripe-webhook", json!({"type": "ping"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["detail"], "Invalid Signature");
}

#[tokio::test]
async fn test_stripe_webhook_bad_signature() {
    let app = test_app().await;
    let mut request = post_json("/api/stripe/stripe-webhook", json!({"type": "ping"}));
    request.headers_mut().insert(
        "stripe-signature",
        format!("t={},v1=deadbeef", chrono::Utc::now().timestamp()).parse().unwrap(),
    );
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stripe_checkout_for_unknown_customer_is_acknowledged() {
    let app = test_app().await;
    let payload = json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": "cs_1",
            "payment_status": "paid",
            "customer_email": "nobody@example.com",
            "metadata": {"name": "pro"}
        }}
    })
    .to_string();

    let request = Request::builder()
        .method("POST")
        .uri("/api/stripe/stripe-webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .header("stripe-signature", stripe_signature(&payload, chrono::Utc::now().timestamp()))
        .body(Body::from(payload))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "Success");
}

fn signed_checkout(event_id: &str, plan: &str) -> Request<Body> {
    let payload = json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": "cs_1",
            "payment_status": "paid",
            "customer_email": "ana@example.com",
            "metadata": {"name": plan}
        }}
    })
    .to_string();

    Request::builder()
        .method("POST")
        .uri("/api/stripe/stripe-webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .header("stripe-signature", stripe_signature(&payload, chrono::Utc::now().timestamp()))
        .body(Body::from(payload))
        .unwrap()
}

#[tokio::test]
async fn test_stripe_redelivery_does_not_activate_again() {
    let app = test_app().await;
    Mock::given(method("POST"))
        .and(path(format!("{}/stripe_events", DOCS)))
        .and(query_param("documentId", "evt_dup"))
        .respond_with(ResponseTemplate::new(409))
        .expect(1)
        .mount(&app.firestore)
        .await;
    // No user lookup or write may happen for an already processed event.
    Mock::given(path_regex(r"/documents/(users|user_emails)"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&app.firestore)
        .await;

    let response = app
        .router
        .oneshot(signed_checkout("evt_dup", "Starter"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "Success");
}

async fn mount_stripe_catalog(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "prod_starter", "name": "Starter"}]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/prices"))
        .and(query_param("product", "prod_starter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "price_starter", "unit_amount": 999, "currency": "usd"}]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_checkout_plan_comes_from_price() {
    let app = test_app().await;
    mount_stripe_catalog(&app.providers).await;
    Mock::given(method("POST"))
        .and(path("/checkout/sessions"))
        .and(body_string_contains("metadata%5Bname%5D=Starter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_9", "url": "https://checkout.stripe.com/c/cs_9"
        })))
        .expect(1)
        .mount(&app.providers)
        .await;

    let response = app
        .router
        .oneshot(post_json(
            "/api/stripe/subs",
            json!({"email": "ana@example.com", "name": "Team", "priceId": "price_starter"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["session_id"], "cs_9");
}

#[tokio::test]
async fn test_checkout_rejects_unknown_price() {
    let app = test_app().await;
    mount_stripe_catalog(&app.providers).await;
    Mock::given(method("POST"))
        .and(path("/checkout/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "cs_x"})))
        .expect(0)
        .mount(&app.providers)
        .await;

    let response = app
        .router
        .oneshot(post_json(
            "/api/stripe/subs",
            json!({"email": "ana@example.com", "name": "Team", "priceId": "price_team"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["detail"], "Unknown priceId");
}

#[tokio::test]
async fn test_sync_webhook_rejects_wrong_secret() {
    let app = test_app().await;
    let response = app
        .router
        .oneshot(post_json(
            "/api/video/sync-webhook?secret=wrong",
            json!({"id": "job-1", "status": "COMPLETED"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
