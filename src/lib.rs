pub mod browser;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod scraper;
pub mod service;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod testing;
