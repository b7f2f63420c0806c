pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod provider;
pub mod rpc;
pub mod scoring;
#[cfg(test)]
pub mod test_helpers;
