pub mod auth;
pub mod backend;
pub mod config;
pub mod errors;
pub mod logging;
pub mod mcp;
pub mod sanitize;
pub mod tenant;
