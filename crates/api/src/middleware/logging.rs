//! Logging initialization and configuration.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Per-crate directives appended to the configured level. The protocol
/// traffic this server cares about lives in the request spans; sqlx
/// statement logging and hyper connection churn at the same level drown
/// it out.
fn filter_directives(level: &str) -> String {
    format!("{level},sqlx=warn,hyper=warn")
}

/// Initializes the logging subsystem based on configuration.
///
/// The json format flattens the current request span into each event, so
/// `request_id` and `enroll_id` arrive as top-level fields for log
/// ingestion. The pretty format is for development.
pub fn init_logging(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config.level)));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            let json_layer = fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true);
            subscriber.with(json_layer).init();
        }
        _ => {
            let pretty_layer = fmt::layer()
                .pretty()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true);
            subscriber.with(pretty_layer).init();
        }
    }
}
