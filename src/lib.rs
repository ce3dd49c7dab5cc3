pub mod config;
pub mod error;
pub mod models;
pub mod quota;
pub mod register;
pub mod server;
pub mod store;
pub mod token;
pub mod upstream;
