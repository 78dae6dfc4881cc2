use axum::Router;

use crate::state::SharedState;

pub mod docs;
pub mod health;
pub mod peer_link;
pub mod peers;
pub mod race;
pub mod sse;

/// Compose the host's route trees and bind them to the shared state.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(peer_link::router())
        .merge(peers::router())
        .merge(race::router())
        .merge(docs::router());

    api_router.with_state(state)
}
