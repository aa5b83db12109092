//! Tracing initialisation shared by every binary in the workspace.

use std::panic;

use tracing::{error, instrument};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialises the global tracing subscriber and panic hook for `service_name`.
///
/// Debug builds get a compact, human-readable formatter; release builds emit
/// flattened JSON suitable for log aggregation. `RUST_LOG` overrides the
/// default filter when set.
///
/// # Panics
/// Panics if a global subscriber has already been installed.
#[instrument(skip_all)]
pub fn init_tracing(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "{service_name}={level},tower_http=warn,hyper=warn",
            level = if cfg!(debug_assertions) { "debug" } else { "info" }
        )
        .into()
    });

    if cfg!(debug_assertions) {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .init();
    }

    install_panic_hook(service_name);
}

fn install_panic_hook(service_name: &str) {
    let service_name = service_name.to_string();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");

        error!(service = %service_name, %location, %payload, "panic");
    }));
}
