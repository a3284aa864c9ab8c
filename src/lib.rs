#![forbid(unsafe_code)]

//! A minimal HTTP listener that answers every request with the same canned
//! response and appends one access log record per connection, plus tools to
//! generate and analyse that traffic.

pub mod listener;
pub mod traffic;
pub mod utils;
