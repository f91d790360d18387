//! ssbd entrypoint wiring the scoreboard link, QR logins and score sync.

use std::{env, sync::Arc};

use anyhow::{Context, anyhow, bail};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ssbd::{
    config::AppConfig,
    dao::{game_adapter, identity::IdentityStore},
    error::RpcError,
    services::{
        commands::builtin_commands,
        display::TracingDisplay,
        file_watcher::PollingWatcher,
        link_supervisor,
        qr_ingest::QrIngest,
        registration,
        rpc_channel::{RpcChannel, RpcSettings},
        score_sync::ScoreSync,
        session_service::SessionManager,
    },
    state::Shutdown,
};

const REGISTER_CODE_ENV: &str = "SSBD_REGISTER_CODE";
const UPLOAD_ONCE_ENV: &str = "SSBD_UPLOAD_ONCE";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("TLS crypto provider already installed");
    }

    let config = AppConfig::load();
    let store = IdentityStore::new(&config.identity_path);
    let shutdown = Shutdown::new();
    let channel = RpcChannel::new(RpcSettings::from(&config), shutdown.clone());

    if let Some(code) = env::var(REGISTER_CODE_ENV).ok().filter(|code| !code.is_empty()) {
        return register_machine(&channel, &store, &code).await;
    }

    let adapter = game_adapter::adapter_for(&config.game).with_context(|| {
        format!(
            "unsupported game `{}`; expected one of {:?}",
            config.game,
            game_adapter::supported_games()
        )
    })?;
    let identity = store
        .load()
        .context("loading machine identity; register this machine first")?;
    channel.set_identity(identity).await;

    match channel.connect().await {
        Ok(()) => {}
        Err(RpcError::Authentication) => bail!("scoreboard rejected machine credentials"),
        Err(err) => warn!(error = %err, "scoreboard unreachable at startup; will keep retrying"),
    }

    let session = SessionManager::new(
        Arc::new(channel.clone()),
        Arc::new(TracingDisplay),
        config.display_duration,
        shutdown.clone(),
    );

    if env::var_os(UPLOAD_ONCE_ENV).is_some() {
        let mut sync = ScoreSync::new(adapter, Arc::new(channel.clone()), session.clone());
        let outcomes = sync.upload_all().await;
        info!(?outcomes, "one-shot score upload finished");
        session.shutdown().await;
        channel.shutdown().await;
        return Ok(());
    }

    channel.install_commands(builtin_commands(&channel, session.clone(), store));

    let scanner = QrIngest::new(
        &config.scanner_device,
        session.clone(),
        config.scan_debounce,
        shutdown.clone(),
    );
    if let Err(err) = scanner.start().await {
        session.shutdown().await;
        channel.shutdown().await;
        return Err(err).context("starting QR scanner");
    }

    let watcher = PollingWatcher::new(
        adapter.scores_path(),
        [adapter.high_scores_file(), adapter.last_scores_file()],
        config.watch_interval,
    );
    let sync = ScoreSync::new(adapter.clone(), Arc::new(channel.clone()), session.clone());
    let sync_task = tokio::spawn(sync.run(watcher, shutdown.subscribe()));
    let link_task = tokio::spawn({
        let channel = channel.clone();
        let shutdown = shutdown.clone();
        async move {
            let result = link_supervisor::run(channel, shutdown.subscribe()).await;
            if result.is_err() {
                shutdown.trigger();
            }
            result
        }
    });

    info!(game = %config.game, "ssbd running");
    shutdown_signal(&shutdown).await;
    info!("shutting down");
    shutdown.trigger();

    let mut fatal = Vec::new();
    if let Err(err) = sync_task.await {
        fatal.push(anyhow!("score sync task failed: {err}"));
    }
    match link_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => fatal.push(anyhow!("scoreboard link lost: {err}")),
        Err(err) => fatal.push(anyhow!("link supervisor failed: {err}")),
    }
    if let Err(err) = scanner.stop().await {
        fatal.push(anyhow!("QR scanner stopped: {err}"));
    }
    session.shutdown().await;
    channel.shutdown().await;

    for err in &fatal {
        error!(error = %err, "fatal condition during run");
    }
    match fatal.into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn register_machine(
    channel: &RpcChannel,
    store: &IdentityStore,
    code: &str,
) -> anyhow::Result<()> {
    channel
        .connect()
        .await
        .context("connecting to scoreboard for registration")?;
    let result = registration::register(channel, store, code).await;
    channel.shutdown().await;
    let identity = result.context("registering machine")?;
    info!(uuid = %identity.uuid, "registration complete");
    Ok(())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C, SIGTERM or an internal shutdown request.
async fn shutdown_signal(shutdown: &Shutdown) {
    let mut internal = shutdown.subscribe();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
            _ = internal.wait() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = internal.wait() => {},
        }
    }
}
