use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use mailgate::config::{ServerEnv, load_config};
use mailgate::dispatch::{AttachmentStaging, DispatchCoordinator, NotifierAsset, WebhookNotifier};
use mailgate::gateway::Gateway;
use mailgate::smtp::{self, Authenticator, SmtpContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = ServerEnv::from_env();
    // Held for the life of the process so buffered file logs get flushed.
    let _log_guard = init_tracing(env.log_dir.as_deref());

    let config = load_config(&env.config_path)
        .with_context(|| format!("Failed to load {}", env.config_path.display()))?;

    eprintln!("📮 mailgate v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Config: {}", env.config_path.display());
    eprintln!("   SMTP: {}:{}", config.listen.host, config.listen.port);
    eprintln!("   Recipients: {}", config.registry.len());

    let notifier = WebhookNotifier::new(NotifierAsset::default(), config.request_timeout)?;
    let coordinator = DispatchCoordinator::new(
        Arc::new(notifier),
        AttachmentStaging::new(config.attachment_dir),
    );
    let gateway = Gateway::with_simple_router(Arc::new(config.registry), coordinator);

    let authenticator = config
        .authenticator
        .map(|auth| Arc::new(auth) as Arc<dyn Authenticator>);
    if authenticator.is_some() {
        info!("SMTP authentication required");
    }
    let ctx = Arc::new(SmtpContext {
        gateway: Arc::new(gateway),
        authenticator,
        hostname: config.hostname,
        max_message_size: config.max_message_size,
    });

    let listener = TcpListener::bind((config.listen.host.as_str(), config.listen.port))
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                config.listen.host, config.listen.port
            )
        })?;

    tokio::select! {
        result = smtp::serve(listener, ctx) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}

/// Console logging always; a daily rolling file as well when a log
/// directory is configured.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            use tracing_subscriber::layer::SubscriberExt;
            use tracing_subscriber::util::SubscriberInitExt;

            let appender = tracing_appender::rolling::daily(dir, "mailgate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter())
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(false)
                .init();
            None
        }
    }
}
