pub mod audit;
pub mod auth;
pub mod authz;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod security;
pub mod server;
pub mod state;
pub mod types;

pub use server::app;
pub use state::AppState;
