use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use huddle_api::middleware::require_auth;
use huddle_api::{AppState, AppStateInner, messages, reactions, rooms};
use huddle_gateway::{Hub, Pipeline, connection};

#[derive(Clone)]
struct ServerState {
    hub: Hub,
    pipeline: Pipeline,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("HUDDLE_JWT_SECRET")
        .context("HUDDLE_JWT_SECRET must be set (no insecure default)")?;
    let db_path = std::env::var("HUDDLE_DB_PATH").unwrap_or_else(|_| "huddle.db".into());
    let host = std::env::var("HUDDLE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("HUDDLE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let sweep_secs: u64 = std::env::var("HUDDLE_RETENTION_SWEEP_SECS")
        .unwrap_or_else(|_| "3600".into())
        .parse()?;

    // Init database
    let db = Arc::new(huddle_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let hub = Hub::new();
    let pipeline = Pipeline::new(hub.clone(), db.clone());
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        hub: hub.clone(),
        pipeline: pipeline.clone(),
        jwt_secret,
    });

    // Retention sweeper
    tokio::spawn(retention_sweeper(db, Duration::from_secs(sweep_secs)));

    // Routes
    let rest_routes = Router::new()
        .route("/rooms", post(rooms::create_room))
        .route("/rooms", get(rooms::list_rooms))
        .route("/rooms/{room_id}", get(rooms::get_room))
        .route("/rooms/{room_id}", patch(rooms::update_room))
        .route("/rooms/{room_id}", delete(rooms::delete_room))
        .route("/rooms/{room_id}/participants", post(rooms::add_participant))
        .route(
            "/rooms/{room_id}/participants/{user_id}",
            delete(rooms::remove_participant),
        )
        .route("/rooms/{room_id}/messages", get(messages::get_messages))
        .route("/rooms/{room_id}/messages", post(messages::send_message))
        .route(
            "/rooms/{room_id}/messages/{message_id}",
            patch(messages::edit_message),
        )
        .route(
            "/rooms/{room_id}/messages/{message_id}",
            delete(messages::delete_message),
        )
        .route(
            "/rooms/{room_id}/messages/{message_id}/reactions",
            post(reactions::toggle_reaction),
        )
        .route("/rooms/{room_id}/read", post(messages::mark_read))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(ServerState { hub, pipeline });

    let app = Router::new()
        .merge(rest_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Huddle server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.hub, state.pipeline))
}

/// Periodically deletes messages older than their room's retention window.
async fn retention_sweeper(db: Arc<huddle_db::Database>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        let db = db.clone();
        match tokio::task::spawn_blocking(move || db.purge_expired_messages()).await {
            Ok(Ok(0)) => {}
            Ok(Ok(n)) => info!("retention sweep purged {n} expired messages"),
            Ok(Err(e)) => warn!("retention sweep failed: {e}"),
            Err(e) => warn!("retention sweep task failed: {e}"),
        }
    }
}
