pub mod hierarchy;
pub mod models;
pub mod permission;
pub mod ports;
pub mod services;
pub mod status;
