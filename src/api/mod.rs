pub mod routes;

pub use routes::{create_router, AppState, MAX_LOOKBACK_DAYS};
