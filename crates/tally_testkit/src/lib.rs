//! # Tally Testkit
//!
//! Test utilities for Tally sync.
//!
//! This crate provides:
//! - Property-based generators for records and remote batches
//! - Simulated devices syncing against an in-process server
//! - Convergence assertions across devices and the server
//!
//! ## Usage
//!
//! ```rust
//! use tally_testkit::prelude::*;
//!
//! let cloud = Cloud::open();
//! let phone = cloud.device("phone", 1_000);
//! let laptop = cloud.device("laptop", 2_000);
//!
//! phone.write(transaction("coffee", -350));
//! laptop.write(transaction("salary", 250_000));
//!
//! phone.sync();
//! laptop.sync();
//! phone.sync();
//!
//! assert_converged(&cloud, &[&phone, &laptop]);
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
