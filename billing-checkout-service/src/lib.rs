pub mod models;
pub mod service;

pub use service::{AppState, create_app, runner_from_env};
