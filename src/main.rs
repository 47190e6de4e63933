mod cli;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use cee_gateway::auth::{AuthState, NonceStore};
use cee_gateway::config::{self, Config};
use cee_gateway::llm::{self, fixtures::FixtureAdapter};
use cee_gateway::pipeline::{self, PipelineDeps, PipelineRequest};
use cee_gateway::quota::backend::{QuotaBackend, RedisBucketBackend};
use cee_gateway::quota::{BucketParams, QuotaStore};
use cee_gateway::routes::share::ShareStore;
use cee_gateway::sse::{self, Registry as StreamRegistry};
use cee_gateway::state::AppState;
use cee_gateway::telemetry;
use cee_gateway::verify::engine::{EngineClient, HttpEngineClient};

/// Short timeout for the initial Redis handshake; the quota and nonce
/// backends apply their own per-call timeouts afterward (spec §4.A′/§4.B′).
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let config = config::load()?;
    let cli = cli::Cli::parse();

    match cli.command {
        Some(cli::Commands::Fixtures {
            brief,
            seed,
            archetype_hint,
        }) => run_fixtures(brief, seed, archetype_hint).await,
        Some(cli::Commands::Serve { port }) => run_server(config, port).await,
        None => run_server(config, None).await,
    }
}

/// `cee-gateway fixtures --brief "..."` — runs the pipeline once against the
/// deterministic fixture adapter with no network dependency (SPEC_FULL §2
/// "CLI"), printing the response to stdout for smoke checks and load tools.
async fn run_fixtures(brief: String, seed: u64, archetype_hint: Option<String>) -> anyhow::Result<()> {
    let adapter = FixtureAdapter::new();
    let deps = PipelineDeps {
        adapter: &adapter,
        engine_client: None,
        require_engine: false,
        production: false,
        model_name: "fixtures".to_string(),
        max_repair_retries: None,
    };
    let response = pipeline::run(
        PipelineRequest {
            brief,
            seed: Some(seed),
            archetype_hint,
        },
        &deps,
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_server(config: Config, port_override: Option<u16>) -> anyhow::Result<()> {
    let port = port_override.unwrap_or(config.port);

    let redis_conn = connect_redis(&config.redis_url).await;

    let quota_backend: Option<Arc<dyn QuotaBackend>> = redis_conn.clone().map(|conn| {
        Arc::new(RedisBucketBackend::new(conn, Duration::from_millis(200))) as Arc<dyn QuotaBackend>
    });

    let refill_window = config.default_rate_limit_window_secs.max(1) as f64;
    let ordinary = BucketParams {
        capacity: config.default_rate_limit as f64,
        refill_per_sec: config.default_rate_limit as f64 / refill_window,
    };
    let stream = BucketParams {
        capacity: config.stream_rate_limit as f64,
        refill_per_sec: config.stream_rate_limit as f64 / refill_window,
    };
    let quota = Arc::new(QuotaStore::new(quota_backend, ordinary, stream));

    let nonce_store = if config.redis_hmac_nonce_enabled {
        Arc::new(NonceStore::new(redis_conn, Duration::from_millis(200)))
    } else {
        Arc::new(NonceStore::new_memory_only())
    };

    let auth_state = Arc::new(AuthState {
        api_keys: config.api_keys.clone(),
        hmac_secret: config.hmac_secret.clone(),
        hmac_max_skew: config.hmac_max_skew,
        quota: quota.clone(),
        nonce_store,
        legacy_sse_enabled: config.enable_legacy_sse,
    });

    let adapter = Arc::from(llm::select_adapter(&config, config.model_draft.as_deref()));

    let engine_client: Option<Arc<dyn EngineClient>> = config.isl_base_url.clone().map(|base_url| {
        Arc::new(HttpEngineClient::new(base_url, config.isl_timeout, config.isl_max_retries))
            as Arc<dyn EngineClient>
    });

    let streams = Arc::new(StreamRegistry::new(sse::DEFAULT_RESUME_WINDOW));
    sse::spawn_sweeper(streams.clone());

    let shares = Arc::new(ShareStore::default());

    let state = Arc::new(AppState {
        config,
        auth: auth_state,
        quota,
        adapter,
        engine_client,
        streams,
        shares,
    });

    let app = cee_gateway::routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(event = "server_listening", %addr, "cee-gateway listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Best-effort Redis connect: a failure here means every shared-backend call
/// falls through to the in-process fallback (spec §9 "Cache + fallback"), so
/// this never aborts startup — it only logs once.
async fn connect_redis(redis_url: &str) -> Option<redis::aio::ConnectionManager> {
    let client = match redis::Client::open(redis_url) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(event = "redis_connect_failed", error = %e, "invalid REDIS_URL, running without shared backend");
            return None;
        }
    };

    match tokio::time::timeout(REDIS_CONNECT_TIMEOUT, client.get_connection_manager()).await {
        Ok(Ok(conn)) => Some(conn),
        Ok(Err(e)) => {
            tracing::warn!(event = "redis_connect_failed", error = %e, "running without shared backend");
            None
        }
        Err(_) => {
            tracing::warn!(event = "redis_connect_timeout", "running without shared backend");
            None
        }
    }
}
