//! Transparent TCP relay that records every byte in both directions.
//!
//! Each accepted connection becomes a [`Session`](session::Session): it resolves an upstream
//! (fixed, or taken from an HTTP proxy request line), then runs two
//! [`copy_to_eof`](copier::copy_to_eof) loops that share one [`LogSink`](log_sink::LogSink).

pub mod config;
pub mod copier;
pub mod endpoint;
pub mod error;
pub mod log_files;
pub mod log_sink;
pub mod proxy;
pub mod request;
pub mod session;
