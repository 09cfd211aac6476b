//! Repair Feedback Module
//!
//! Turns validator reports into repair requests and bounds how many an
//! expert gets:
//!
//! ```text
//! Expert → Bundle → BundleValidator → RepairCoordinator → Expert.repair
//!                        ↑                                      |
//!                        └──────────────────────────────────────┘
//! ```
//!
//! When the bound is hit the expert's output is replaced by a safe bundle
//! synthesized from the registry.

pub mod correction_loop;
pub mod fallback;

pub use correction_loop::{
    RepairConfig, RepairCoordinator, RepairPhase, Resolution, DEFAULT_MAX_REPAIR_ITERATIONS,
};
pub use fallback::{safe_bundle, DEFAULT_FALLBACK_CONFIDENCE};
