pub mod error;
pub mod types;
pub mod distribution;
pub mod model;
pub mod cashflow;
pub mod valuation;
pub mod deterministic;
pub mod sensitivity;

#[cfg(feature = "monte_carlo")]
pub mod monte_carlo;

pub use error::EngineError;
pub use types::*;

/// Standard result type for all engine operations
pub type EngineResult<T> = Result<T, EngineError>;
