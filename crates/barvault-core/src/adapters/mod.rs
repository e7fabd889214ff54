//! Upstream provider adapters.
//!
//! | Adapter | Bars | Fundamentals | Published averages |
//! |---------|------|--------------|--------------------|
//! | [`AlpacaAdapter`] | v2 daily bars | - | - |
//! | [`YahooAdapter`] | v8 chart | v10 quoteSummary | 50/200-day |

mod alpaca;
mod yahoo;

pub use alpaca::{AlpacaAdapter, AlpacaCredentials};
pub use yahoo::{YahooAdapter, YahooAuthManager};
