//! Business logic services.

pub mod documents;
pub mod lipsync;
pub mod lipsync_poller;
pub mod quota;
pub mod user;

pub use lipsync::{LipSyncService, SubmitJob, UpdateSource};
pub use lipsync_poller::{LipSyncPoller, PollStats};
pub use quota::{ChargeSummary, QuotaService};
pub use user::UserService;
