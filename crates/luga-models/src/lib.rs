//! Shared data models for the LugaAI backend.
//!
//! This crate provides Serde-serializable types for:
//! - Subscription plans and per-resource quotas
//! - User accounts
//! - Chat conversation history
//! - Stored audio/video media and cloned voices
//! - Lip-sync jobs

pub mod conversation;
pub mod lipsync;
pub mod media;
pub mod plan;
pub mod quota;
pub mod user;
pub mod utils;

// Re-export common types
pub use conversation::{ConversationEntry, DayCount, DayGroup, HistoryItem};
pub use lipsync::{JobSnapshot, JobTransition, LipSyncJob, LipSyncStatus};
pub use media::{
    AudioRecord, AudioSource, ClonedVoice, MediaKind, StorageProvider, StoredObject, VideoRecord,
};
pub use plan::{PlanTier, SubscriptionStatus};
pub use quota::{Quota, QuotaCharge, QuotaKind, QuotaShortfall, UNLIMITED};
pub use user::{AuthProvider, ChatProvider, User};
pub use utils::InputError;
