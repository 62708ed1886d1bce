//! # ODAVL-RS: Delta-First Analysis & Self-Healing Engine
//!
//! A Rust implementation of the odavl code-quality platform core. The
//! library provides:
//!
//! - **Insight analysis**: pluggable detectors with fingerprinted findings
//!   compared against a stored baseline (delta-first CI)
//! - **Autopilot self-healing**: scored fix recipes executed under strict
//!   safety constraints with verification and rollback
//! - **Trust & telemetry**: per-recipe reliability learned from session
//!   outcomes, feeding back into future scoring
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         API Layer                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Core Engine   │  Detectors   │  I/O & State                 │
//! │                │              │                              │
//! │ • Fingerprint  │ • Registry   │ • Baselines                  │
//! │ • Baseline     │ • Executors  │ • Session reports            │
//! │ • Intake       │ • Bundled    │ • Trust store                │
//! │ • Fusion       │              │ • Telemetry streams          │
//! │ • Execution    │              │ • Audit log                  │
//! │ • Session      │              │                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use odavl_rs::{OdavlConfig, OdavlEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = OdavlEngine::new("./my-project", OdavlConfig::default())?;
//!     let outcome = engine.analyze().await?;
//!
//!     println!("{} findings, exit {}", outcome.findings.len(), outcome.exit_code);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

// Core analysis and self-healing modules
pub mod core {
    //! Core algorithms and data structures.

    pub mod baseline;
    pub mod config;
    pub mod errors;
    pub mod execution;
    pub mod findings;
    pub mod fingerprint;
    pub mod fusion;
    pub mod intake;
    pub mod policy;
    pub mod recipes;
    pub mod scoring;
    pub mod session;
    pub mod trust;
}

// Detector capability contract and executors
pub mod detectors;

// I/O, persistence, and reporting
pub mod io {
    //! State directory, telemetry streams, and session reports.

    pub mod reports;
    pub mod state;
    pub mod telemetry;
}

// Public API and engine interface
pub mod api {
    //! High-level API and engine interface.

    pub mod engine;
}

// Re-export primary types for convenience
pub use crate::api::engine::{AnalyzeOutcome, OdavlEngine};
pub use crate::core::config::OdavlConfig;
pub use crate::core::errors::{OdavlError, Result, ResultExt};
pub use crate::core::findings::{Finding, IssueCategory, Severity};
pub use crate::core::session::{SelfHealSession, SessionOutcome};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
