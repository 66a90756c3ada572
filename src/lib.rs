pub mod bridge;
pub mod cli;
pub mod config;
pub mod correlator;
pub mod document;
pub mod dump;
pub mod error;
pub mod logging;
pub mod mapper;
pub mod poller;
pub mod pubsub;
pub mod query;
pub mod replay;
pub mod sink;
pub mod source;
pub mod store;
pub mod timestamp;

#[cfg(test)]
pub mod test_support;
