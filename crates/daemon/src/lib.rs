pub mod config;
mod error;
mod server;

pub use error::ApiError;
pub use server::{build_router, AppState, MAX_RESTORE_BODY_BYTES};
