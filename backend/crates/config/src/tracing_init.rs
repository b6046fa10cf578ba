use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the tracing subscriber with env-based filtering.
///
/// Reads `RUST_LOG` (or `LOG_LEVEL`) to set the filter and `LOG_FORMAT`
/// (`json` or `text`) to pick the output format.
/// Defaults to `default_level` and text output.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = fmt().with_env_filter(filter).with_target(true);

    // try_init: a second call (tests, embedded use) keeps the first subscriber.
    let result = if wants_json(std::env::var("LOG_FORMAT").ok().as_deref()) {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing already initialised: {e}");
    }
}

fn wants_json(format: Option<&str>) -> bool {
    matches!(format.map(str::trim), Some(f) if f.eq_ignore_ascii_case("json"))
}
