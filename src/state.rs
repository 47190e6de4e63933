//! Shared application state (spec §2 "Control flow"). Grounded on the
//! teacher's `AppState` struct in `main.rs`, trimmed to the collaborators
//! this service actually has: quota, HMAC/nonce, the LLM adapter, the
//! optional external engine, SSE stream registry, and the share-link store.

use std::sync::Arc;

use crate::auth::AuthState;
use crate::config::Config;
use crate::llm::LlmAdapter;
use crate::quota::QuotaStore;
use crate::routes::share::ShareStore;
use crate::sse::Registry as StreamRegistry;
use crate::verify::engine::EngineClient;

pub struct AppState {
    pub config: Config,
    pub auth: Arc<AuthState>,
    pub quota: Arc<QuotaStore>,
    pub adapter: Arc<dyn LlmAdapter>,
    pub engine_client: Option<Arc<dyn EngineClient>>,
    pub streams: Arc<StreamRegistry>,
    pub shares: Arc<ShareStore>,
}
