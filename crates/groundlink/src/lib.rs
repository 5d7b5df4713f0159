//! # groundlink
//!
//! Ground-station link scorer for a digital FPV video downlink.
//!
//! Reads per-interval radio statistics (RSSI, SNR, loss, FEC recoveries) as
//! JSON lines from the stats daemon over TCP and answers each video sample
//! with a length-prefixed UDP control datagram: link score, penalty,
//! suggested FEC increase and an optional keyframe request code.
//!
//! ## Crate structure
//!
//! - [`config`] — Parameter set loading and validation (TOML)
//! - [`stats`] — Decoding of the stats JSON stream
//! - [`kalman`] — Scalar Kalman filter over the packet error ratio
//! - [`keyframe`] — Keyframe request codes and their lifetime
//! - [`scorer`] — Score, penalty and FEC-change computation
//! - [`wire`] — Control datagram encoding and decoding
//! - [`emitter`] — UDP sender
//! - [`ingest`] — TCP reader with reconnect; drives everything else

pub mod config;
pub mod emitter;
pub mod ingest;
pub mod kalman;
pub mod keyframe;
pub mod scorer;
pub mod stats;
pub mod wire;
