//! Processed Stripe webhook events, keyed by event id.

use chrono::Utc;
use tracing::debug;

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::Fields;

const STRIPE_EVENTS: &str = "stripe_events";

#[derive(Clone)]
pub struct StripeEventRepository {
    client: FirestoreClient,
}

impl StripeEventRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Mark `event_id` as being handled. Returns `false` if it was already claimed.
    pub async fn claim(&self, event_id: &str, event_type: &str) -> FirestoreResult<bool> {
        let fields = Fields::new()
            .set("event_type", event_type)
            .set("received_at", Utc::now());

        match self
            .client
            .create_document(STRIPE_EVENTS, event_id, fields.into_inner())
            .await
        {
            Ok(_) => Ok(true),
            Err(FirestoreError::AlreadyExists(_)) => {
                debug!(event_id, "Stripe event already processed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop a claim whose handling failed so the redelivery is processed.
    pub async fn release(&self, event_id: &str) -> FirestoreResult<()> {
        self.client.delete_document(STRIPE_EVENTS, event_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FirestoreConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EVENTS: &str = "/v1/projects/test/databases/(default)/documents/stripe_events";

    async fn repo(server: &MockServer) -> StripeEventRepository {
        let config = FirestoreConfig::emulator("test", server.address().to_string());
        StripeEventRepository::new(FirestoreClient::new(config).await.unwrap())
    }

    #[tokio::test]
    async fn test_first_delivery_is_claimed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(EVENTS))
            .and(query_param("documentId", "evt_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "projects/test/databases/(default)/documents/stripe_events/evt_1",
                "fields": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        assert!(repo(&server)
            .await
            .claim("evt_1", "checkout.session.completed")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_redelivery_is_not_claimed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(EVENTS))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        assert!(!repo(&server)
            .await
            .claim("evt_1", "checkout.session.completed")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_release_deletes_claim() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/evt_1", EVENTS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        repo(&server).await.release("evt_1").await.unwrap();
    }
}
