pub mod app;
pub mod auth;
pub mod cli;
pub mod clients;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod pipeline;
