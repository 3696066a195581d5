pub mod cache;
pub mod condition;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod hub;
pub mod model;
pub mod providers;
pub mod retry;
pub mod routes;
pub mod transport;
