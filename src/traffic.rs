#![forbid(unsafe_code)]

pub mod analyser;
pub mod generator;
