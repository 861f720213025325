//! Token lifecycle broker
//!
//! Sits between the durable store and the FieldHub token endpoint: completes
//! the OAuth code exchange, hands out valid access tokens, and refreshes
//! proactively when a token is within the refresh window. Refresh is purely
//! on-demand — no background sweep, no timers.

mod broker;
mod error;

pub use broker::{REFRESH_WINDOW, TokenBroker};
pub use error::{Error, Result};
