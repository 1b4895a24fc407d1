use tracing_subscriber::{fmt, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"))
}

/// Install a human-readable tracing subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = fmt().with_env_filter(env_filter()).with_target(false).try_init();
}

/// Install a JSON tracing subscriber for structured log collection
pub fn init_tracing_json() {
    let _ = fmt().json().with_env_filter(env_filter()).try_init();
}
