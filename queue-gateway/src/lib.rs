pub mod api;
pub mod broker;
pub mod config;
pub mod gateway;
pub mod locks;
pub mod prometheus;
pub mod queues;
pub mod router;
pub mod server;
