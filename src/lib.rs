pub mod app;
pub mod cli;
pub mod download;
pub mod engine;
pub mod pagination;
pub mod remote;
pub mod session;
pub mod store;
pub mod util;

pub use app::config::Config;
pub use engine::{EngineRequest, EngineResponse, Orchestrator};
