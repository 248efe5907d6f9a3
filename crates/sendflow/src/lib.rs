pub mod api;
pub mod config;
pub mod db;
pub mod mail;
pub mod queue;
pub mod store;
pub mod telemetry;
