pub extern crate actix_web;

pub mod config;
pub mod connection;
pub mod executor;
pub mod handlers;
pub mod presence;
pub mod session;
pub mod session_registry;
