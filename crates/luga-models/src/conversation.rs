//! Chat conversation history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::user::ChatProvider;

/// Length of the prompt prefix used when no title can be generated.
pub const FALLBACK_TITLE_CHARS: usize = 30;

/// One prompt/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConversationEntry {
    pub id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub title: String,
    pub prompt: String,
    pub response: String,
    pub provider: ChatProvider,
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    /// Calendar day (UTC) of the exchange, `YYYY-MM-DD`.
    pub fn date(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }
}

/// History entries that share a calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DayGroup {
    pub date: String,
    pub conversations: Vec<HistoryItem>,
}

/// History entry as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HistoryItem {
    pub conversation_id: String,
    pub title: String,
    pub prompt: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub date: String,
}

impl From<&ConversationEntry> for HistoryItem {
    fn from(entry: &ConversationEntry) -> Self {
        Self {
            conversation_id: entry.conversation_id.clone(),
            title: entry.title.clone(),
            prompt: entry.prompt.clone(),
            response: entry.response.clone(),
            timestamp: entry.timestamp,
            date: entry.date(),
        }
    }
}

/// Number of exchanges on a given day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DayCount {
    pub date: String,
    pub count: usize,
}

/// Group entries by day, newest day first and newest entry first within a day.
pub fn group_by_day(entries: &[ConversationEntry]) -> Vec<DayGroup> {
    let mut by_day: BTreeMap<String, Vec<&ConversationEntry>> = BTreeMap::new();
    for entry in entries {
        by_day.entry(entry.date()).or_default().push(entry);
    }

    by_day
        .into_iter()
        .rev()
        .map(|(date, mut items)| {
            items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            DayGroup {
                date,
                conversations: items.into_iter().map(HistoryItem::from).collect(),
            }
        })
        .collect()
}

/// Count entries per day, newest day first.
pub fn day_counts(entries: &[ConversationEntry]) -> Vec<DayCount> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for entry in entries {
        *counts.entry(entry.date()).or_default() += 1;
    }
    counts
        .into_iter()
        .rev()
        .map(|(date, count)| DayCount { date, count })
        .collect()
}

/// Title used when the model could not produce one.
pub fn fallback_title(prompt: &str) -> String {
    let prefix: String = prompt.chars().take(FALLBACK_TITLE_CHARS).collect();
    format!("{}...", prefix.trim_end())
}

/// Strip surrounding quotes and whitespace from a model-generated title.
pub fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: &str, ts: DateTime<Utc>) -> ConversationEntry {
        ConversationEntry {
            id: id.to_string(),
            user_id: "u1".to_string(),
            conversation_id: "c1".to_string(),
            title: "t".to_string(),
            prompt: format!("prompt {id}"),
            response: "r".to_string(),
            provider: ChatProvider::OpenAi,
            timestamp: ts,
        }
    }

    #[test]
    fn test_group_by_day_orders_newest_first() {
        let entries = vec![
            entry("a", Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()),
            entry("b", Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap()),
            entry("c", Utc.with_ymd_and_hms(2025, 1, 1, 20, 0, 0).unwrap()),
        ];

        let groups = group_by_day(&entries);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].date, "2025-01-02");
        assert_eq!(groups[1].date, "2025-01-01");
        assert_eq!(groups[1].conversations[0].prompt, "prompt c");
        assert_eq!(groups[1].conversations[1].prompt, "prompt a");
    }

    #[test]
    fn test_day_counts() {
        let entries = vec![
            entry("a", Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()),
            entry("b", Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()),
            entry("c", Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap()),
        ];
        assert_eq!(
            day_counts(&entries),
            vec![
                DayCount { date: "2025-03-04".into(), count: 1 },
                DayCount { date: "2025-03-01".into(), count: 2 },
            ]
        );
    }

    #[test]
    fn test_empty_history() {
        assert!(group_by_day(&[]).is_empty());
        assert!(day_counts(&[]).is_empty());
    }

    #[test]
    fn test_titles() {
        assert_eq!(clean_title("  \"Rust Async Basics\" "), "Rust Async Basics");
        assert_eq!(fallback_title("short"), "short...");
        let long = "a".repeat(50);
        assert_eq!(fallback_title(&long), format!("{}...", "a".repeat(30)));
        // Multi-byte prompts are cut on char boundaries.
        assert_eq!(fallback_title(&"é".repeat(40)).chars().count(), 33);
    }
}
