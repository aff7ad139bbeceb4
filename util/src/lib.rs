//! Utility library for the arm control software

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod audit;
pub mod host;
pub mod logger;
pub mod params;
pub mod session;
pub mod time;
