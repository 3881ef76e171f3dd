//! Onboarding server: HTTP surfaces over the registration flow.
//!
//! - `/v1/registrations/...` addresses flows by an opaque handle
//! - `/web/registration/...` keeps the flow in the caller's session

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod signal;

pub use config::Config;
pub use error::ApiError;
pub use signal::SignalDelivery;
