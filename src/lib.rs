pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod notify;
pub mod state;
pub mod storage;
pub mod types;

#[cfg(test)]
pub mod test_support;
