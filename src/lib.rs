//! Financial Research Assistant
//!
//! A conversational research assistant that:
//! - Classifies each turn as small talk, vague, or actionable
//! - Decomposes actionable requests into tool steps
//! - Runs market data, web search, charting and email tools in order
//! - Caches price data and charts per session
//! - Synthesizes one report per turn, degrading to raw results on failure
//!
//! TURN:
//! PLAN → (ambiguous? → END) → EXECUTE → SYNTHESIZE → END

pub mod api;
pub mod assistant;
pub mod config;
pub mod error;
pub mod execution;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod models;
pub mod planner;
pub mod routing;
pub mod session;
pub mod stream;
pub mod tools;

#[cfg(test)]
mod testing;

pub use error::Result;

pub use models::*;
