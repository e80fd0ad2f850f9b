//! HTTP middleware components.

pub mod auth;
pub mod cert;
pub mod logging;
pub mod metrics;
pub mod trace_id;

pub use auth::require_api_key;
pub use cert::{client_cert, ClientCert};
pub use metrics::{init_metrics, metrics_handler, metrics_middleware};
pub use trace_id::{trace_id, EnrollIdLabel, RequestId, REQUEST_ID_HEADER};
