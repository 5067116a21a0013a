pub mod aggregator;
pub mod client;
pub mod config;
pub mod error;
pub mod http_client;
pub mod model;
pub mod normalizer;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod provider_factory;
pub mod providers;
pub mod quota;
pub mod server;
pub mod sse;
pub mod stream;
pub mod telemetry;
pub mod validation;
#[cfg(test)]
pub mod test_util;
