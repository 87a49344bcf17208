//! # Tailfeed Testkit
//!
//! Test utilities for tailfeed.
//!
//! This crate provides:
//! - Antenna row fixtures and scripted tail intervals
//! - JSON-lines recordings in temporary directories
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tailfeed_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_script() {
//!     let rows = TailScript::new().interval(&[("1", 6.0)]).build();
//!     // ... feed the rows through a cursor source
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
