//! Kredo: a discovery and reputation index for signed agent attestations.
//!
//! The crate is organized around the pipeline a request actually takes:
//! a signed document arrives (`domain`), gets canonicalized (`codec`) and
//! checked (`signature`), is persisted (`store`), and then feeds the
//! reputation (`trust`) and profile (`profile`) views the rest of the
//! network reads back out. `api` wires all of it into one HTTP surface.

pub mod api;
pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod evidence;
pub mod profile;
pub mod ratelimit;
pub mod signature;
pub mod store;
pub mod taxonomy;
pub mod trust;

use crate::config::ServerConfig;
use crate::profile::ProfileAssembler;
use crate::ratelimit::InProcessRateLimiter;
use crate::store::Store;
use crate::taxonomy::TaxonomyRegistry;
use crate::trust::TrustEngine;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// Shared state handed to every handler in `api::router`.
pub struct AppState {
    pub store: Arc<Store>,
    pub trust: Arc<TrustEngine>,
    pub profiles: ProfileAssembler,
    pub taxonomy: Arc<TaxonomyRegistry>,
    pub rate_limiter: InProcessRateLimiter,
}

/// Build the fully-wired application state: opens the store, seeds the
/// taxonomy, constructs the trust engine and subscribes it to store writes,
/// and builds the rate limiter from config.
pub fn build_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let store = Arc::new(Store::open(&config.db_path)?);
    let taxonomy = TaxonomyRegistry::bootstrap(store.clone())?;
    let trust = TrustEngine::new(store.clone(), Duration::from_secs(config.trust_cache_ttl_seconds));
    trust.register_invalidation();
    let profiles = ProfileAssembler::new(store.clone(), trust.clone());
    let rate_limiter = InProcessRateLimiter::new(&config.rate_limits_json);

    Ok(Arc::new(AppState { store, trust, profiles, taxonomy, rate_limiter }))
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins = config.cors_origins();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| o.parse().ok()))
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

/// Build the full axum router, CORS layer included, ready to serve.
pub fn build_router(state: Arc<AppState>, config: &ServerConfig) -> axum::Router {
    api::router(state)
        .layer(cors_layer(config))
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
}

/// Bind and serve until the process is signaled to stop.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let state = build_state(&config)?;
    let router = build_router(state, &config);

    tracing::info!(bind_addr = %config.bind_addr, "starting kredo-server");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, router.into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;
    Ok(())
}
