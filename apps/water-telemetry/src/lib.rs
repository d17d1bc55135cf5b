pub mod channel;
pub mod cli;
pub mod config;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod ingest;
pub mod link;
pub mod query;
pub mod routes;
pub mod sample;
pub mod state;
pub mod store;
pub mod time;

#[cfg(test)]
pub mod test_support;
