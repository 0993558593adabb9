//! Application state.

use std::sync::Arc;

use luga_clients::{
    ChatClient, ChatConfig, ElevenLabsClient, ElevenLabsConfig, IdentityClient, IdentityConfig, MailConfig,
    Mailer, StripeClient, StripeConfig, SyncClient, SyncConfig,
};
use luga_firestore::{
    ConversationRepository, FirestoreClient, LipSyncJobRepository, MediaRepository, QuotaRepository,
    StripeEventRepository, TokenBlacklistRepository, UserRepository,
};
use luga_storage::{store_from_env, ObjectStore};

use crate::auth::TokenKeys;
use crate::config::ApiConfig;
use crate::services::{LipSyncService, QuotaService, UserService};

/// Third-party clients the handlers talk to.
#[derive(Clone)]
pub struct Providers {
    pub chat: ChatClient,
    pub elevenlabs: ElevenLabsClient,
    pub sync: SyncClient,
    pub stripe: StripeClient,
    pub mailer: Mailer,
    pub identity: Arc<IdentityClient>,
}

impl Providers {
    /// Build every client from the environment. Missing required keys fail here.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            chat: ChatClient::new(ChatConfig::from_env()),
            elevenlabs: ElevenLabsClient::new(ElevenLabsConfig::from_env()?),
            sync: SyncClient::new(SyncConfig::from_env()?),
            stripe: StripeClient::new(StripeConfig::from_env()?),
            mailer: Mailer::new(MailConfig::from_env())?,
            identity: Arc::new(IdentityClient::new(IdentityConfig::from_env())),
        })
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub tokens: Arc<TokenKeys>,
    pub firestore: FirestoreClient,
    pub store: Arc<dyn ObjectStore>,
    pub providers: Providers,

    pub users: UserRepository,
    pub lipsync_jobs: LipSyncJobRepository,
    pub blacklist: TokenBlacklistRepository,
    pub stripe_events: StripeEventRepository,

    pub user_service: UserService,
    pub quota: QuotaService,
    pub lipsync: LipSyncService,
}

impl AppState {
    /// Create new application state.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let firestore = FirestoreClient::from_env().await?;
        let store = store_from_env().await?;
        let providers = Providers::from_env()?;
        Ok(Self::assemble(config, firestore, store, providers))
    }

    /// Wire repositories and services around already-built clients.
    pub fn assemble(
        config: ApiConfig,
        firestore: FirestoreClient,
        store: Arc<dyn ObjectStore>,
        providers: Providers,
    ) -> Self {
        let config = Arc::new(config);
        let tokens = Arc::new(TokenKeys::new(&config.jwt_secret, config.access_token_ttl));

        let users = UserRepository::new(firestore.clone());
        let lipsync_jobs = LipSyncJobRepository::new(firestore.clone());
        let blacklist = TokenBlacklistRepository::new(firestore.clone());
        let stripe_events = StripeEventRepository::new(firestore.clone());

        let quota = QuotaService::new(
            QuotaRepository::new(firestore.clone()),
            providers.mailer.clone(),
        );
        let user_service = UserService::new(
            users.clone(),
            blacklist.clone(),
            Arc::clone(&tokens),
            providers.mailer.clone(),
            Arc::clone(&providers.identity),
            Arc::clone(&config),
        );
        let lipsync = LipSyncService::new(providers.sync.clone(), lipsync_jobs.clone(), quota.clone());

        Self {
            config,
            tokens,
            firestore,
            store,
            providers,
            users,
            lipsync_jobs,
            blacklist,
            stripe_events,
            user_service,
            quota,
            lipsync,
        }
    }

    pub fn conversations(&self, user_id: &str) -> ConversationRepository {
        ConversationRepository::new(self.firestore.clone(), user_id)
    }

    pub fn media(&self, user_id: &str) -> MediaRepository {
        MediaRepository::new(self.firestore.clone(), user_id)
    }
}
