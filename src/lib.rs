pub mod auth;
pub mod config;
pub mod db;
pub mod handlers;
pub mod model;
pub mod queue;
pub mod server;
pub mod translator;
pub mod wordpress;
