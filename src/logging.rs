use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` on stderr using `SYNAPSE_LOG` first,
/// then `RUST_LOG`, then `info`.
///
/// Field conventions: `file` is the base name being processed, `rule` the
/// asset mapping's file type, `accession` the catalog ID, `url` the stored
/// object location. Every batch runs inside an `upload_run` span with a
/// `run_id`.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("SYNAPSE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
