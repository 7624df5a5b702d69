pub mod app;
pub mod config;
pub mod server;

pub use app::{build_engine, build_registry};
pub use server::{build_router, AppState};
