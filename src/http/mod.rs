//! HTTP and WebSocket transport facade: routes, shared state, and the
//! response envelope.

pub mod logout;
pub mod login;
pub mod response;
pub mod root;
pub mod session;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::crypto::RsaKeys;
use crate::registry::Registry;

pub(crate) const SID_COOKIE: &str = "sid";
pub(crate) const NONCE_COOKIE: &str = "nonce";

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub rsa: Arc<RsaKeys>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root::root))
        .route("/api/login", get(login::login))
        .route(
            "/api/session",
            get(session::session_get)
                .post(session::session_body)
                .put(session::session_body)
                .delete(session::session_body)
                .patch(session::session_body),
        )
        .route("/api/logout", get(logout::logout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
