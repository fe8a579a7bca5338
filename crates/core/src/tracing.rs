#[cfg(feature = "trace")]
pub(crate) mod tracer {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::{Layer, Registry};

    pub fn init_tracer(level: Option<LevelFilter>) -> anyhow::Result<()> {
        let default_filter = level.unwrap_or(LevelFilter::DEBUG);
        let filter_layer = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(default_filter.into())
            .from_env_lossy();

        use tracing_subscriber::layer::SubscriberExt;

        if std::env::var("STS_DISABLE_LOGS").is_ok() {
            return Ok(());
        }
        let to_stderr = std::env::var("STS_LOG_TO_STDERR").is_ok();
        let fmt_layer = tracing_subscriber::fmt::layer().with_level(true).pretty();
        let fmt_layer = if cfg!(debug_assertions) {
            fmt_layer.with_file(true).with_line_number(true)
        } else {
            fmt_layer
        };
        let fmt_layer = if to_stderr {
            fmt_layer.with_writer(std::io::stderr).boxed()
        } else {
            fmt_layer.boxed()
        };

        let subscriber = Registry::default().with(fmt_layer.with_filter(filter_layer));
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(())
    }
}
