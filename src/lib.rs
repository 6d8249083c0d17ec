// Sealed Session - library root

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod http_client;
pub mod middleware;
pub mod routes;
pub mod session;
