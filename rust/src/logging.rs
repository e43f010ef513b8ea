/// Logging initialization.
///
/// Installs a `tracing-subscriber` fmt subscriber writing to stderr, filtered by `RUST_LOG`
/// (default `clinichat_core=debug,info`). Native shells that install their own subscriber
/// first win: a second initialization is a no-op.
///
/// Called once at the start of `ChatApp::new()`, before anything else.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clinichat_core=debug,info".into()),
        )
        .try_init();
}
