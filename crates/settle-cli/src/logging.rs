use tracing_subscriber::EnvFilter;

/// Crates whose events follow `--log-level`; everything else logs warnings only.
const SETTLE_TARGETS: &[&str] = &[
    "settle",
    "settle_engine",
    "settle_core",
    "settle_state",
    "settle_types",
    "settle_source_sql",
    "settle_source_document",
    "settle_source_http",
    "settle_dest_warehouse",
];

/// Directive used when neither `SETTLE_LOG` nor `RUST_LOG` is set.
pub fn default_directive(log_level: &str) -> String {
    std::iter::once("warn".to_string())
        .chain(SETTLE_TARGETS.iter().map(|target| format!("{target}={log_level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Log to stderr so `list` and `checkpoint` output stays pipeable.
///
/// `SETTLE_LOG` wins over `RUST_LOG`; both take full filter directives.
pub fn init(log_level: &str) {
    let env_filter = EnvFilter::try_from_env("SETTLE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
