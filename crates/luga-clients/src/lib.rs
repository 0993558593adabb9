//! Third-party API clients for the LugaAI backend.
//!
//! - Chat completions (OpenAI, DeepSeek, Grok)
//! - ElevenLabs text-to-speech and voice cloning
//! - Sync.so lip-sync jobs
//! - Stripe checkout and webhooks
//! - SMTP mail
//! - Google / Facebook identity

pub mod chat;
pub mod elevenlabs;
pub mod error;
pub mod http;
pub mod identity;
pub mod mailer;
pub mod stripe;
pub mod sync;

pub use chat::{ChatClient, ChatConfig};
pub use elevenlabs::{ElevenLabsClient, ElevenLabsConfig, Voice, VoiceSample};
pub use error::{ClientError, ClientResult};
pub use identity::{FacebookProfile, GoogleClaims, IdentityClient, IdentityConfig};
pub use mailer::{MailConfig, Mailer};
pub use stripe::{CheckoutSession, Plan, StripeClient, StripeConfig, WebhookEvent};
pub use sync::{GenerateRequest, SyncClient, SyncConfig};
