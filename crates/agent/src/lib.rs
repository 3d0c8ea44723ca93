//! NetPulse daemon: runs a monitoring session and serves it over HTTP

pub mod api;
pub mod config;
