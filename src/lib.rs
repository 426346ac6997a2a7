pub mod api_client;
pub mod app_url;
pub mod backtester;
pub mod commands;
pub mod config;
pub mod context;
pub mod data_context;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod indicators;
pub mod loader;
pub mod models;
pub mod optimizer;
pub mod optimizer_status;
pub mod param_utils;
pub mod performance;
pub mod price_file;
pub mod scanner;
