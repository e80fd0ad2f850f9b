use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use domain::services::{CertAuthPolicy, CertAuthService, CoreService, MdmService};
use domain::store::Store;

use crate::config::Config;
use crate::middleware::{
    client_cert, metrics_handler, metrics_middleware, require_api_key, trace_id,
};
use crate::routes::{admin, health, mdm};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Storage contract, used directly by the admin surface and probes.
    pub store: Arc<dyn Store>,
    /// The MDM protocol service (core behind the cert-auth gate).
    pub service: Arc<dyn MdmService>,
}

pub fn create_app(config: Config, store: Arc<dyn Store>) -> Router {
    let config = Arc::new(config);

    let policy = CertAuthPolicy {
        warn_only: config.certauth.warn_only,
        retire: config.certauth.retire,
        reject_rebind: config.certauth.reject_rebind,
    };
    let service: Arc<dyn MdmService> = Arc::new(
        CertAuthService::new(CoreService::new(store.clone()), store.clone()).with_policy(policy),
    );

    let state = AppState {
        config: config.clone(),
        store,
        service,
    };

    let mdm_routes = Router::new()
        .route("/mdm/checkin", post(mdm::checkin))
        .route("/mdm/command", post(mdm::command))
        .route("/mdm", post(mdm::combined))
        .layer(from_fn_with_state(state.clone(), client_cert));

    let admin_routes = Router::new()
        .route("/v1/enqueue/:ids", put(admin::enqueue))
        .route("/v1/pushinfo/:ids", get(admin::push_info))
        .layer(from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .merge(mdm_routes)
        .merge(admin_routes)
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/metrics", get(metrics_handler))
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(trace_id))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
