use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `filter` wins over `RUST_LOG`; with neither set the level is `info`.
/// Logs go to stderr so stdout carries only the summary. Thread names are
/// shown so member and staff lines can be told apart.
pub fn init(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();
}
