//! Profile Drive server binary.
//!
//! Stores named character profiles as JSON documents with an optional
//! portrait image. The main entry point prepares both storage namespaces,
//! builds the Axum router and serves HTTP until a shutdown signal arrives.

mod app;
mod assets;
mod atomic;
mod config;
mod error;
mod etag;
mod http;
mod images;
mod logging;
mod profile;
mod storage;
mod upload;
mod view;

use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use crate::app::{AppState, build_router};
use crate::assets::AssetStore;
use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::profile::ProfileStore;
use crate::storage::{FsDocumentStore, Namespace};
use crate::upload::UploadConfig;

shadow!(build);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let profiles_namespace = Namespace::new(PathBuf::from(&args.profiles_dir));
    let images_namespace = Namespace::new(PathBuf::from(&args.images_dir));
    profiles_namespace.ensure_root().await?;
    images_namespace.ensure_root().await?;
    info!(
        profiles = ?profiles_namespace.root_path(),
        images = ?images_namespace.root_path(),
        "storage ready"
    );

    let app = build_router(AppState {
        profiles: Arc::new(ProfileStore::new(Arc::new(FsDocumentStore::new(
            profiles_namespace,
        )))),
        assets: Arc::new(AssetStore::new(images_namespace)),
        upload: Arc::new(UploadConfig {
            public_url: args.public_url.clone(),
            max_upload_size: args.max_upload_size,
        }),
        cors_origins: args.cors_origins.clone(),
    });

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("Starting HTTP server at {}", addr);

    tokio::spawn(shutdown_signal(handle.clone()));
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
