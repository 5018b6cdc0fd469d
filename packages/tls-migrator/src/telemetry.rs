use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is not set. The migrator is always verbose.
pub const DEFAULT_FILTER: &str = "debug,hyper=info,hyper_util=info,reqwest=info,rustls=info";

/// Build the JSON logger owned by a migrator instance.
///
/// Nothing is installed globally; callers scope work to the returned
/// dispatcher (`WithSubscriber` for futures, `dispatcher::with_default` for
/// blocking code).
pub fn build_logger() -> Dispatch {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_ansi(false)
        .finish();

    Dispatch::new(subscriber)
}

