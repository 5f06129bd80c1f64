//! 路由装配：上传、读取与头像静态资源。

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::assets::AssetStore;
use crate::http::{add_security_headers, build_cors_layer};
use crate::images::serve_image;
use crate::profile::ProfileStore;
use crate::upload::{UploadConfig, upload_profile};
use crate::view::view_profile;

pub struct AppState {
    pub profiles: Arc<ProfileStore>,
    pub assets: Arc<AssetStore>,
    pub upload: Arc<UploadConfig>,
    pub cors_origins: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    let mut app = Router::new()
        .route(
            "/upload/{name}",
            post(upload_profile).layer(DefaultBodyLimit::max(state.upload.max_upload_size)),
        )
        .route("/view/{name}", get(view_profile))
        .route("/images/{filename}", get(serve_image))
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let forwarded_ip = request
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.split(',').next().unwrap_or("").trim().to_string());
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.to_string());
                    let client_ip = forwarded_ip
                        .or(connect_ip)
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(Extension(state.profiles))
        .layer(Extension(state.assets))
        .layer(Extension(state.upload));

    if let Some(cors_layer) = build_cors_layer(state.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }
    app
}
