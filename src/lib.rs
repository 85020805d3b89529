pub mod appresult;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod rooms;
pub mod store;

use std::sync::Arc;

use axum::{extract::FromRef, routing::get, Router};
use tower_http::cors::CorsLayer;

pub use appresult::{AppError, AppResult};

use auth::Gateway;
use config::Config;
use rooms::RoomRegistry;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub gateway: Gateway,
    pub registry: RoomRegistry,
    pub config: Arc<Config>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/ws", get(rooms::room_ws))
        .nest("/api/rooms", rooms::router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
