//! Service wiring: configuration, logging, media services and the HTTP listener.
//!
//! # Design
//! - `run_app` owns process-global concerns (environment, subscriber, signals).
//! - `run_app_with` takes injected dependencies and a shutdown future so tests can
//!   boot the server without touching the environment.

use std::future::Future;

use tracing::{info, warn};
use tunedrop_api::ApiServer;
use tunedrop_config::{AppConfig, ToolSource, Toolchain};
use tunedrop_media::ConversionService;
use tunedrop_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics};

use crate::error::{AppError, AppResult};

/// Dependencies required to bootstrap the Tunedrop service.
pub(crate) struct BootstrapDependencies {
    config: AppConfig,
    telemetry: Metrics,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment for the binary entrypoint.
    pub(crate) fn from_env() -> AppResult<Self> {
        let config =
            AppConfig::from_env().map_err(|err| AppError::config("config.from_env", err))?;
        Self::new(config)
    }

    pub(crate) fn new(config: AppConfig) -> AppResult<Self> {
        let telemetry =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        Ok(Self { config, telemetry })
    }
}

/// Entry point for the Tunedrop boot sequence.
///
/// # Errors
///
/// Returns an error if configuration is invalid, logging cannot be installed, or the
/// HTTP listener fails.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    let logging = logging_config(&dependencies.config);
    tunedrop_telemetry::init_logging(&logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    run_app_with(dependencies, shutdown_signal()).await
}

/// Boot sequence that relies entirely on injected dependencies to simplify testing.
pub(crate) async fn run_app_with<F>(
    dependencies: BootstrapDependencies,
    shutdown: F,
) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let _context = GlobalContextGuard::new("bootstrap");
    let BootstrapDependencies { config, telemetry } = dependencies;

    info!(
        retrieval = %config.toolchain.retrieval.program.display(),
        retrieval_source = config.toolchain.retrieval.source.as_str(),
        encoder = %config.toolchain.encoder.program.display(),
        encoder_source = config.toolchain.encoder.source.as_str(),
        info_timeout_secs = config.limits.info_timeout.as_secs(),
        convert_timeout_secs = config.limits.convert_timeout.as_secs(),
        "Tunedrop bootstrap starting"
    );
    for tool in unresolved_tools(&config.toolchain) {
        warn!(tool, "tool not found on search path; relying on spawn-time PATH lookup");
    }

    let conversions =
        ConversionService::new(config.toolchain.clone(), &config.limits, telemetry.clone());
    let api = ApiServer::new(conversions, telemetry);

    let addr = config.socket_addr();
    info!(addr = %addr, "Launching API listener");
    api.serve(addr, shutdown)
        .await
        .map_err(|err| AppError::api_server("api_server.serve", err))?;
    info!("API server shutdown complete");
    Ok(())
}

fn unresolved_tools(toolchain: &Toolchain) -> Vec<&'static str> {
    [
        ("yt-dlp", toolchain.retrieval.source),
        ("ffmpeg", toolchain.encoder.source),
    ]
    .into_iter()
    .filter(|(_, source)| *source == ToolSource::Unresolved)
    .map(|(tool, _)| tool)
    .collect()
}

fn logging_config(config: &AppConfig) -> LoggingConfig<'static> {
    let mut logging = LoggingConfig::default();
    if let Some(format) = config.log_format.as_deref() {
        logging.format = LogFormat::from_setting(format);
    }
    logging
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::TcpListener;
    use tunedrop_config::{ConfigError, ToolProbe};
    use tunedrop_config::defaults::{
        ENV_BIND_ADDR, ENV_FFMPEG_PATH, ENV_LOG_FORMAT, ENV_PORT, ENV_YTDLP_PATH,
    };

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        Ok(AppConfig::from_lookup(
            |key| vars.get(key).cloned(),
            &ToolProbe::default(),
        )?)
    }

    #[test]
    fn logging_config_honours_explicit_format() -> anyhow::Result<()> {
        let config = config_from(&[(ENV_LOG_FORMAT, "json")])?;
        assert_eq!(logging_config(&config).format, LogFormat::Json);

        let config = config_from(&[])?;
        assert_eq!(logging_config(&config).format, LogFormat::infer());
        Ok(())
    }

    #[test]
    fn unresolved_tools_are_reported_after_loading() -> anyhow::Result<()> {
        let config = config_from(&[])?;
        assert_eq!(unresolved_tools(&config.toolchain), vec!["yt-dlp", "ffmpeg"]);

        let config = config_from(&[
            (ENV_YTDLP_PATH, "/opt/tools/yt-dlp"),
            (ENV_FFMPEG_PATH, "/opt/tools/ffmpeg"),
        ])?;
        assert!(unresolved_tools(&config.toolchain).is_empty());
        Ok(())
    }

    #[test]
    fn invalid_port_surfaces_as_config_error() {
        let err = config_from(&[(ENV_PORT, "0")]).map(|_| ());
        assert!(err.is_err_and(|err| matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidField { field: "TUNEDROP_PORT", .. })
        )));
    }

    #[tokio::test]
    async fn server_stops_when_shutdown_resolves() -> anyhow::Result<()> {
        let mut config = config_from(&[(ENV_BIND_ADDR, "127.0.0.1")])?;
        config.port = 0;
        let dependencies = BootstrapDependencies::new(config)?;
        run_app_with(dependencies, async {}).await?;
        Ok(())
    }

    #[tokio::test]
    async fn occupied_port_reports_api_server_error() -> anyhow::Result<()> {
        let occupied = TcpListener::bind("127.0.0.1:0")?;
        let port = occupied.local_addr()?.port().to_string();
        let config = config_from(&[(ENV_BIND_ADDR, "127.0.0.1"), (ENV_PORT, &port)])?;
        let dependencies = BootstrapDependencies::new(config)?;

        let result = run_app_with(dependencies, async {}).await;
        assert!(matches!(
            result,
            Err(AppError::ApiServer {
                operation: "api_server.serve",
                source: tunedrop_api::ApiServerError::Bind { .. },
            })
        ));
        drop(occupied);
        Ok(())
    }
}
