//! Stripe checkout, plan listing and webhook verification over the REST API.

use std::collections::HashMap;
use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::http::{check_status, http_client, optional_env, required_env};

type HmacSha256 = Hmac<Sha256>;

const PROVIDER: &str = "stripe";
const DEFAULT_API_URL: &str = "https://api.stripe.com/v1";
/// Maximum age of a signed webhook.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_key: SecretString,
    pub webhook_secret: Option<SecretString>,
    pub frontend_url: String,
    pub base_url: String,
}

impl StripeConfig {
    pub fn from_env() -> ClientResult<Self> {
        Ok(Self {
            api_key: SecretString::from(required_env("STRIPE_API_KEY")?),
            webhook_secret: optional_env("STRIPE_WEBHOOK_SECRET").map(SecretString::from),
            frontend_url: optional_env("FRONTEND_URL").unwrap_or_else(|| "http://localhost:3000".to_string()),
            base_url: optional_env("STRIPE_BASE_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    /// Buyer email, from the session or the metadata set at checkout.
    pub fn email(&self) -> Option<&str> {
        self.customer_email
            .as_deref()
            .or_else(|| self.metadata.get("email").map(String::as_str))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Price {
    pub id: String,
    #[serde(default)]
    pub unit_amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub prices: Vec<Price>,
}

impl Plan {
    pub fn offers(&self, price_id: &str) -> bool {
        self.prices.iter().any(|p| p.id == price_id)
    }
}

#[derive(Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct Product {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
}

/// A verified webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub object: serde_json::Value,
}

#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            http: http_client(Duration::from_secs(30)),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.config.webhook_secret.as_ref().map(|s| s.expose_secret())
    }

    /// One-off payment session for `price_id`. `name` is the plan display name.
    pub async fn create_checkout_session(
        &self,
        email: &str,
        name: &str,
        price_id: &str,
    ) -> ClientResult<CheckoutSession> {
        let frontend = self.config.frontend_url.trim_end_matches('/');
        let success_url = format!("{}/success?session_id={{CHECKOUT_SESSION_ID}}", frontend);
        let cancel_url = format!("{}/cancel", frontend);
        let form = [
            ("mode", "payment"),
            ("payment_method_types[]", "card"),
            ("line_items[0][price]", price_id),
            ("line_items[0][quantity]", "1"),
            ("success_url", success_url.as_str()),
            ("cancel_url", cancel_url.as_str()),
            ("customer_email", email),
            ("metadata[priceId]", price_id),
            ("metadata[email]", email),
            ("metadata[name]", name),
        ];

        let response = self
            .http
            .post(self.url("checkout/sessions"))
            .bearer_auth(self.config.api_key.expose_secret())
            .form(&form)
            .send()
            .await?;
        let response = check_status(PROVIDER, response).await?;

        let session: CheckoutSession = response.json().await?;
        info!(session_id = %session.id, plan = name, "Created checkout session");
        Ok(session)
    }

    pub async fn retrieve_session(&self, session_id: &str) -> ClientResult<CheckoutSession> {
        let response = self
            .http
            .get(self.url(&format!("checkout/sessions/{}", session_id)))
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await?;
        let response = check_status(PROVIDER, response).await?;
        Ok(response.json().await?)
    }

    /// Active products, each with its active prices.
    pub async fn list_plans(&self) -> ClientResult<Vec<Plan>> {
        let response = self
            .http
            .get(self.url("products"))
            .bearer_auth(self.config.api_key.expose_secret())
            .query(&[("active", "true"), ("limit", "100")])
            .send()
            .await?;
        let products = check_status(PROVIDER, response)
            .await?
            .json::<ListResponse<Product>>()
            .await?
            .data;

        let mut plans = Vec::with_capacity(products.len());
        for product in products {
            let response = self
                .http
                .get(self.url("prices"))
                .bearer_auth(self.config.api_key.expose_secret())
                .query(&[("product", product.id.as_str()), ("active", "true")])
                .send()
                .await?;
            let prices = check_status(PROVIDER, response)
                .await?
                .json::<ListResponse<Price>>()
                .await?
                .data;
            plans.push(Plan {
                id: product.id,
                name: product.name,
                description: product.description,
                prices,
            });
        }
        debug!(count = plans.len(), "Listed subscription plans");
        Ok(plans)
    }
}

/// Verify a `Stripe-Signature` header and parse the event.
///
/// The header is `t=<unix>,v1=<hex>[,v1=<hex>...]`. The payload is signed as
/// `"{t}.{payload}"` with HMAC-SHA256 keyed by the endpoint secret; any `v1`
/// may match.
pub fn verify_webhook(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> ClientResult<WebhookEvent> {
    let mut timestamp: Option<i64> = None;
    let mut signatures = Vec::new();
    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| ClientError::InvalidSignature("missing timestamp".into()))?;
    if signatures.is_empty() {
        return Err(ClientError::InvalidSignature("missing v1 signature".into()));
    }
    if (now - timestamp).abs() > tolerance_secs {
        warn!(timestamp, now, "Stripe webhook outside tolerance");
        return Err(ClientError::InvalidSignature("timestamp outside tolerance".into()));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ClientError::InvalidSignature("invalid secret".into()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|sig| {
        hex::decode(sig)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(ClientError::InvalidSignature("no matching signature".into()));
    }

    serde_json::from_slice(payload).map_err(|e| ClientError::invalid_response(PROVIDER, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> StripeClient {
        StripeClient::new(StripeConfig {
            api_key: SecretString::from("sk_test"),
            webhook_secret: None,
            frontend_url: "https://app.luga.ai/".into(),
            base_url: server.uri(),
        })
    }

    fn sign(payload: &str, secret: &str, t: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", t, payload).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    const EVENT: &str = r#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_1"}}}"#;

    #[test]
    fn test_webhook_accepts_any_matching_v1() {
        let now = 1_700_000_000;
        let good = sign(EVENT, "whsec_abc", now);
        let header = format!("t={},v1={},v1={}", now, "00".repeat(32), good);

        let event = verify_webhook(EVENT.as_bytes(), &header, "whsec_abc", 300, now + 10).unwrap();
        assert_eq!(event.event_type, "checkout.session.completed");
        assert_eq!(event.data.object["id"], "cs_1");
    }

    #[test]
    fn test_webhook_rejections() {
        let now = 1_700_000_000;
        let good = sign(EVENT, "whsec_abc", now);

        let stale = format!("t={},v1={}", now, good);
        assert!(verify_webhook(EVENT.as_bytes(), &stale, "whsec_abc", 300, now + 301).is_err());

        assert!(verify_webhook(EVENT.as_bytes(), &stale, "whsec_other", 300, now).is_err());
        assert!(verify_webhook(EVENT.as_bytes(), &format!("v1={}", good), "whsec_abc", 300, now).is_err());
        assert!(verify_webhook(EVENT.as_bytes(), &format!("t={}", now), "whsec_abc", 300, now).is_err());
    }

    #[tokio::test]
    async fn test_checkout_session_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkout/sessions"))
            .and(header("authorization", "Bearer sk_test"))
            .and(body_string_contains("mode=payment"))
            .and(body_string_contains("metadata%5Bname%5D=Starter"))
            .and(body_string_contains("success_url=https%3A%2F%2Fapp.luga.ai%2Fsuccess%3Fsession_id%3D%7BCHECKOUT_SESSION_ID%7D"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_1", "url": "https://checkout.stripe.com/c/cs_1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = client(&server)
            .create_checkout_session("a@b.co", "Starter", "price_1")
            .await
            .unwrap();
        assert_eq!(session.id, "cs_1");
        assert_eq!(session.url.as_deref(), Some("https://checkout.stripe.com/c/cs_1"));
    }

    #[tokio::test]
    async fn test_list_plans_joins_prices() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "prod_1", "name": "Starter"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/prices"))
            .and(query_param("product", "prod_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "price_1", "unit_amount": 999, "currency": "usd"}]
            })))
            .mount(&server)
            .await;

        let plans = client(&server).list_plans().await.unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].prices[0].unit_amount, Some(999));
    }

    #[tokio::test]
    async fn test_retrieve_session_email_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/checkout/sessions/cs_2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_2", "payment_status": "paid", "customer_email": null,
                "metadata": {"email": "m@b.co", "name": "Team"}
            })))
            .mount(&server)
            .await;

        let session = client(&server).retrieve_session("cs_2").await.unwrap();
        assert!(session.is_paid());
        assert_eq!(session.email(), Some("m@b.co"));
    }
}
