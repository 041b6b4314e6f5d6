/*!
Petits helpers de test: timestamps et logs.
*/

use std::sync::Once;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

/// Parses an RFC 3339 literal. Panics on malformed input; test use only.
pub fn ts(rfc3339: &str) -> OffsetDateTime {
    OffsetDateTime::parse(rfc3339, &Rfc3339)
        .unwrap_or_else(|e| panic!("bad RFC 3339 literal {rfc3339:?}: {e}"))
}

pub fn minutes(n: i64) -> Duration {
    Duration::minutes(n)
}

static TRACING: Once = Once::new();

/// Installs a test-writer fmt subscriber once per process. Filter comes from
/// `RUST_LOG`, default `debug`.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
