// Library exports for the server binary and integration tests

pub mod catalog;
pub mod config;
pub mod db;
pub mod server;
pub mod songs;
pub mod streaming;
pub mod uploads;
