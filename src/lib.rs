pub mod app;
pub mod automation;
pub mod config;
pub mod error;
pub mod inbox;
pub mod realtime;
pub mod store;
pub mod types;

pub use app::{router, run, AppState};
pub use config::Config;
