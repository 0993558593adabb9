//! Chat history at `users/{uid}/conversations`.

use chrono::Utc;
use tracing::warn;

use luga_models::{ChatProvider, ConversationEntry};

use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::types::{Document, Fields, StructuredQuery};

const COLLECTION_ID: &str = "conversations";

/// Hard cap on history reads.
pub const MAX_HISTORY: u32 = 500;

pub struct ConversationRepository {
    client: FirestoreClient,
    user_id: String,
}

impl ConversationRepository {
    pub fn new(client: FirestoreClient, user_id: impl Into<String>) -> Self {
        Self {
            client,
            user_id: user_id.into(),
        }
    }

    fn parent(&self) -> String {
        format!("users/{}", self.user_id)
    }

    fn collection(&self) -> String {
        format!("users/{}/{}", self.user_id, COLLECTION_ID)
    }

    pub async fn append(&self, entry: &ConversationEntry) -> FirestoreResult<()> {
        let fields = Fields::new()
            .set("user_id", entry.user_id.as_str())
            .set("conversation_id", entry.conversation_id.as_str())
            .set("title", entry.title.as_str())
            .set("prompt", entry.prompt.as_str())
            .set("response", entry.response.as_str())
            .set("provider", entry.provider.as_str())
            .set("timestamp", entry.timestamp);

        self.client
            .create_document(&self.collection(), &entry.id, fields.into_inner())
            .await?;
        Ok(())
    }

    /// Most recent entries, newest first.
    pub async fn list(&self, limit: u32) -> FirestoreResult<Vec<ConversationEntry>> {
        let query = StructuredQuery::collection(COLLECTION_ID)
            .order_by_desc("timestamp")
            .limit(limit.clamp(1, MAX_HISTORY));
        let docs = self.client.run_query(&self.parent(), query).await?;
        Ok(self.parse_all(&docs))
    }

    /// All entries of one conversation, oldest first.
    pub async fn by_conversation(&self, conversation_id: &str) -> FirestoreResult<Vec<ConversationEntry>> {
        let query = StructuredQuery::collection(COLLECTION_ID)
            .where_eq("conversation_id", conversation_id)
            .limit(MAX_HISTORY);
        let docs = self.client.run_query(&self.parent(), query).await?;

        let mut entries = self.parse_all(&docs);
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    fn parse_all(&self, docs: &[Document]) -> Vec<ConversationEntry> {
        docs.iter()
            .filter_map(|doc| {
                let parsed = document_to_entry(doc, &self.user_id);
                if parsed.is_none() {
                    warn!(user_id = %self.user_id, doc = ?doc.name, "Skipping malformed conversation entry");
                }
                parsed
            })
            .collect()
    }
}

fn document_to_entry(doc: &Document, user_id: &str) -> Option<ConversationEntry> {
    Some(ConversationEntry {
        id: doc.id()?.to_string(),
        user_id: user_id.to_string(),
        conversation_id: doc.get("conversation_id")?,
        title: doc.get("title").unwrap_or_default(),
        prompt: doc.get("prompt")?,
        response: doc.get("response").unwrap_or_default(),
        provider: doc
            .get::<String>("provider")
            .and_then(|p| ChatProvider::parse(&p))
            .unwrap_or_default(),
        timestamp: doc.get("timestamp").unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_to_entry() {
        let doc = Document {
            name: Some("projects/p/databases/(default)/documents/users/u1/conversations/e1".into()),
            ..Document::new(
                Fields::new()
                    .set("conversation_id", "1700000000000")
                    .set("title", "Greeting")
                    .set("prompt", "hello")
                    .set("response", "hi!")
                    .set("provider", "grok")
                    .set("timestamp", "2025-02-03T04:05:06Z")
                    .into_inner(),
            )
        };
        let entry = document_to_entry(&doc, "u1").unwrap();
        assert_eq!(entry.id, "e1");
        assert_eq!(entry.provider, ChatProvider::Grok);
        assert_eq!(entry.date(), "2025-02-03");
    }

    #[test]
    fn test_entry_without_prompt_is_skipped() {
        let doc = Document {
            name: Some("x/conversations/e2".into()),
            ..Document::new(Fields::new().set("conversation_id", "c").into_inner())
        };
        assert!(document_to_entry(&doc, "u1").is_none());
    }
}
