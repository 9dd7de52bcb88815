//! Breakout Strategy
//!
//! Secondary sub-strategy of the hybrid stack. Only consulted for new
//! entries while the market is classified as trending.

pub mod config;
mod strategy;

pub use config::BreakoutConfig;
pub use strategy::BreakoutStrategy;
