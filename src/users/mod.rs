use crate::state::AppState;
use axum::Router;

mod cookies;
pub mod dto;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod repo;
pub mod services;
pub(crate) mod extractors;

pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/users",
        Router::new()
            .merge(handlers::session_routes())
            .merge(handlers::profile_routes())
            .merge(handlers::graph_routes()),
    )
}
