pub mod catalogue;
pub mod config;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod filters;
pub mod models;
pub mod overlay;
pub mod parser;
pub mod session;
pub mod spatial;
pub mod state;
pub mod stats;
pub mod visibility;
