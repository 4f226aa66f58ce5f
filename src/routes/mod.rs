use axum::response::IntoResponse;
use axum::Router;
use axum::routing::{get, post};
use crate::SharedAppState;

pub mod donation;

pub fn router() -> Router<SharedAppState> {
    Router::new()
        .route("/", get(home_handler))
        .route("/donation", post(donation::handler))
}

pub async fn home_handler() -> impl IntoResponse {
    "Donation bridge is running"
}
