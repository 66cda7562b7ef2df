// API module
//
// JSON front end of the node: every route resolves a chain by name in the
// registry and calls into the ledger core

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use routes::configure_routes;
