//! HTTP surface over the persistence adapter: graph and mission REST plus
//! the SSE execution endpoint that the streaming runner consumes.

mod routes;
mod sequencer;
mod server;
mod state;

pub use server::{router, GatewayServer};
pub use state::AppState;
