//! Logging and metrics setup.
//!
//! All instrumentation uses `#[instrument(skip_all)]` and explicit field
//! allow-listing. Access, refresh, session and identity tokens never appear in
//! logs; account ids and profile ids may.

pub mod metrics;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "hytale_auth=info,hytale_login=info";

/// Install the global tracing subscriber.
///
/// `json` switches the fmt layer to newline-delimited JSON for log shipping.
/// Calling this twice is harmless; the second install is ignored.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        tracing::debug!(target: "hytale_auth.observability", error = %e, "Tracing subscriber already installed");
    }
}
