//! Delivery of codes and messages through a signal-cli REST API.

mod client;

pub use client::{SendMessageRequest, SignalDelivery};
