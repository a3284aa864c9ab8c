#![forbid(unsafe_code)]

pub mod access_log;
pub mod connection;
pub mod response;
pub mod server;

pub use server::{start, Listener};
