use std::{num::NonZeroU64, process, sync::Arc, time::Duration};

use pwa_cache::{
    cache::{CacheStorage, DiskCacheStorage, MemoryCacheStorage},
    config::{self, Command, Settings, StorageSettings},
    error::AppError,
    fetch::HttpFetcher,
    infra::{
        error::InfraError,
        http::{self, ProxyState},
        telemetry,
    },
    worker::{CacheManager, IntervalTrigger, TokioExecutor, run_sweeper},
};
use serde::Serialize;
use tokio::{net::TcpListener, sync::watch};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    if !matches!(command, Command::Serve(_))
        && matches!(settings.storage, StorageSettings::Memory { .. })
    {
        warn!("memory storage does not outlive this command; use the disk backend");
    }

    let manager = Arc::new(build_manager(&settings)?);

    match command {
        Command::Serve(_) => run_serve(settings, manager).await,
        Command::Install(_) => print_report(&manager.install().await),
        Command::Activate(_) => print_report(&manager.activate().await),
        Command::Sweep(_) => print_report(&manager.sweep().await),
        Command::Status(_) => {
            // A fresh process never ran the lifecycle, so only storage is reported.
            print_report(&manager.status_report().await?.without_state())
        }
    }
}

fn build_manager(settings: &Settings) -> Result<CacheManager, AppError> {
    let storage: Arc<dyn CacheStorage> = match &settings.storage {
        StorageSettings::Memory { quota_bytes } => Arc::new(MemoryCacheStorage::with_quota(
            quota_bytes.map(NonZeroU64::get),
        )),
        StorageSettings::Disk { directory } => Arc::new(DiskCacheStorage::new(directory.clone())),
    };

    let fetcher = HttpFetcher::new(settings.upstream.timeout).map_err(|err| {
        InfraError::configuration(format!("failed to build upstream client: {err}"))
    })?;

    Ok(CacheManager::new(
        settings.cache.clone(),
        settings.upstream.origin.clone(),
        storage,
        Arc::new(fetcher),
        Arc::new(TokioExecutor),
    ))
}

fn print_report<T: Serialize>(report: &T) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(report).map_err(InfraError::from)?;
    println!("{json}");
    Ok(())
}

async fn run_serve(settings: Settings, manager: Arc<CacheManager>) -> Result<(), AppError> {
    let install = manager.install().await;
    if !install.failed.is_empty() {
        warn!(
            failed = install.failed.len(),
            "some manifest entries were not precached; they will be cached on first use"
        );
    }
    manager.activate().await;

    let sweeper_handle = settings.sweeper.enabled.then(|| {
        let trigger = IntervalTrigger::new(settings.sweeper.interval);
        tokio::spawn(run_sweeper(Arc::clone(&manager), trigger))
    });

    let router = http::build_router(ProxyState {
        manager,
        body_limit: settings.upstream.body_limit(),
    });

    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        addr = %settings.server.addr,
        origin = %settings.upstream.origin,
        version = %settings.cache.version,
        "caching proxy listening"
    );

    let result = serve_until_shutdown(listener, router, settings.server.graceful_shutdown).await;

    if let Some(handle) = sweeper_handle {
        handle.abort();
    }
    result
}

/// Serve until Ctrl-C, then give open connections `grace` to finish.
async fn serve_until_shutdown(
    listener: TcpListener,
    router: axum::Router,
    grace: Duration,
) -> Result<(), AppError> {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            let _ = stop_rx.changed().await;
        },
    );
    let mut server = std::pin::pin!(server.into_future());

    tokio::select! {
        result = &mut server => {
            return result.map_err(|err| AppError::from(InfraError::from(err)));
        }
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(InfraError::from)?;
            info!(grace_secs = grace.as_secs(), "shutdown requested; draining connections");
        }
    }

    let _ = stop_tx.send(true);
    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => result.map_err(|err| AppError::from(InfraError::from(err))),
        Err(_) => {
            warn!("graceful shutdown timed out; dropping open connections");
            Ok(())
        }
    }
}
