//! HTTP surface of the dispatcher process

pub mod auth;
pub mod error;
pub mod server;
pub mod services;
pub mod state;
pub mod utils;

pub use error::ApiError;
pub use server::{build_router, run};
pub use state::AppState;
