use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use confab_api::middleware::require_auth;
use confab_api::{AppState, AppStateInner, auth, conversations, friends, messages};
use confab_engine::Engine;
use confab_gateway::connection;
use confab_gateway::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "confab=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("CONFAB_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("CONFAB_DB_PATH").unwrap_or_else(|_| "confab.db".into());
    let host = std::env::var("CONFAB_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("CONFAB_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(confab_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let engine = Engine::new(db.clone());
    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db,
        engine,
        dispatcher,
        jwt_secret,
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/me/presence", put(auth::update_presence_setting))
        .route("/friends", get(friends::list))
        .route("/friends/requests", post(friends::create_request))
        .route("/friends/requests/{request_id}/accept", post(friends::accept_request))
        .route("/conversations", get(conversations::list))
        .route("/conversations/single", post(conversations::create_single))
        .route("/conversations/group", post(conversations::create_group))
        .route("/conversations/{conversation_id}", get(conversations::get))
        .route("/conversations/{conversation_id}", patch(conversations::update))
        .route("/conversations/{conversation_id}", delete(conversations::hide))
        .route("/conversations/{conversation_id}/members", post(conversations::add_members))
        .route(
            "/conversations/{conversation_id}/members/{user_id}",
            delete(conversations::remove_member),
        )
        .route(
            "/conversations/{conversation_id}/members/{user_id}/role",
            patch(conversations::update_role),
        )
        .route(
            "/conversations/{conversation_id}/transfer",
            post(conversations::transfer_ownership),
        )
        .route("/conversations/{conversation_id}/disband", post(conversations::disband))
        .route("/conversations/{conversation_id}/leave", post(conversations::leave))
        .route("/conversations/{conversation_id}/read", post(conversations::mark_read))
        .route("/conversations/{conversation_id}/pin", post(conversations::toggle_pin))
        .route("/conversations/{conversation_id}/mute", post(conversations::mute))
        .route("/conversations/{conversation_id}/mute", delete(conversations::unmute))
        .route("/conversations/{conversation_id}/messages", get(messages::list))
        .route("/conversations/{conversation_id}/messages", post(messages::send))
        .route(
            "/conversations/{conversation_id}/messages/{message_id}",
            patch(messages::edit),
        )
        .route(
            "/conversations/{conversation_id}/messages/{message_id}",
            delete(messages::delete),
        )
        .route(
            "/conversations/{conversation_id}/messages/{message_id}/recall",
            post(messages::recall),
        )
        .layer(middleware::from_fn(require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Confab server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}
