//! Telemetry initialization (tracing/tracing-subscriber).
//!
//! Behavior:
//! - LOG_LEVEL controls the filter (e.g. "debug" or detailed directives like
//!   "info,review=debug,backend=debug,cache=info").
//! - LOG_FORMAT selects "pretty" (default) or "json" structured logs.
//!
//! Targets are printed so a line can be traced back to the pipeline stage
//! (`pipeline`, `backend`, `cache`, `review`) that emitted it.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,mathtutor=debug,review=info,backend=info,cache=info";

pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    // JSON vs pretty: two different subscriber types, so finish each branch separately.
    // `try_init` keeps a second call (tests, embedding) from panicking.
    let _ = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().try_init(),
        _ => builder.try_init(),
    };
}
