use pill_core::config::LoggingConfig;
use pill_core::error::AppError;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Overrides `logging.level` when set (any `EnvFilter` directive).
pub const LOG_ENV: &str = "PILLPAL_LOG";

/// Install the global subscriber. Logs go to stderr so stdout stays machine-readable.
pub fn init(cfg: &LoggingConfig) -> Result<(), AppError> {
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(&cfg.level).map_err(|e| {
            AppError::new("LOGGING_INIT_FAILED", "Invalid log level")
                .with_details(format!("level={}; err={e}", cfg.level))
        })?,
    };

    let registry = Registry::default().with(filter);
    let installed = if cfg.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .try_init()
    };
    installed.map_err(|e| {
        AppError::new("LOGGING_INIT_FAILED", "Failed to install log subscriber")
            .with_details(e.to_string())
    })
}

/// Plain subscriber for events emitted before the configuration is known, meant for
/// `tracing::subscriber::with_default` around config loading.
pub fn bootstrap_subscriber<W>(writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(LoggingConfig::default().level));
    Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use pill_core::config::PillPalConfig;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'w> MakeWriter<'w> for Captured {
        type Writer = Captured;

        fn make_writer(&'w self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn config_load_events_reach_the_bootstrap_subscriber() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pillpal.toml");
        std::fs::write(&path, "[retrieval]\ntop_k = 4\n").expect("write config");

        let captured = Captured::default();
        let cfg = tracing::subscriber::with_default(bootstrap_subscriber(captured.clone()), || {
            PillPalConfig::load(Some(&path))
        })
        .expect("load");
        assert_eq!(cfg.retrieval.top_k, 4);

        let out = String::from_utf8(captured.0.lock().expect("lock").clone()).expect("utf8");
        assert!(out.contains("loading configuration file"), "{out}");
    }
}
