//! Verifier Module — deterministic checks on prediction bundles
//!
//! The validator is the only judge of whether a bundle may reach the
//! consensus stage. It never calls out to an expert and never mutates the
//! bundle; it only reports what is wrong.
//!
//! # Usage
//!
//! ```rust,ignore
//! use council_coordination::verifier::BundleValidator;
//!
//! let report = BundleValidator::new().validate(&bundle, &registry);
//! if !report.is_valid() {
//!     println!("{}", report.summary());
//! }
//! ```

pub mod report;
pub mod validator;

pub use report::{CheckStage, ValidationReport, Violation};
pub use validator::{BundleValidator, MAX_STAKE_WEIGHT};
