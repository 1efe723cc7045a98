#![forbid(unsafe_code)]

pub mod app_state;
pub mod broadcast;
pub mod client;
pub mod health;
pub mod orchestrator;
pub mod state;
