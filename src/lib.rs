// Public API for integration tests and potential library usage

pub mod api;
pub mod config;
pub mod driver;
pub mod engine;
pub mod feedback;
pub mod llm;
pub mod protocol;
pub mod questions;
pub mod state;
pub mod store;
pub mod types;
pub mod view;
pub mod ws;

// Background tasks started by the binary
pub mod broadcast;
