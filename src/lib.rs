pub mod auth;
pub mod config;
pub mod converter;
pub mod db;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod models;
pub mod routes;
pub mod schema;
pub mod state;
pub mod utils;
pub mod workers;

pub use workers::{default_handlers, TimeoutSweeper, Worker};
