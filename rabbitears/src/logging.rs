//! Logging initialisation.

use std::env;
use tracing_subscriber::{filter::Targets, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialises `tracing` for the given `--verbose` level (0..=5).
/// `RUST_LOG` overrides the derived filter.
pub fn init(verbose: u8) {
    let level = match verbose {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    let default_filter = format!("warn,rabbitears={level},rabbitears_core={level}")
        .parse::<Targets>()
        .expect("valid filter");

    let registry = tracing_subscriber::registry()
        .with(
            env::var("RUST_LOG")
                .ok()
                .and_then(|filter| filter.parse::<Targets>().ok())
                .unwrap_or(default_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        );
    if let Err(err) = registry.try_init() {
        eprintln!("setting tracing default failed: {err:?}");
    }
}
