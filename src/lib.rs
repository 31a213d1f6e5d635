//! Twistwatch Library
//!
//! A Rust library for monitoring root domains against typosquatting and
//! phishing lookalikes. The heavy lifting (permutation generation, DNS
//! fuzzing, banner grabbing, fuzzy/perceptual hash similarity) is delegated
//! to an external CLI tool invoked as a subprocess; this crate provides:
//!
//! - Root-domain validation and IDNA normalization
//! - Subprocess invocation and JSON row mapping for the external tool
//! - Risk classification of the tool's similarity scores
//! - SQLite persistence of domains, permutations, schedules, and matches
//! - A REST API for review frontends, plus a message-queue pass-through
//!
//! # Example
//!
//! ```rust
//! use twistwatch::domain_utils::validate_root_domain;
//! use twistwatch::risk::{classify, RiskLevel};
//! use twistwatch::config::RiskConfig;
//!
//! let ascii = validate_root_domain("https://Example.COM/login")?;
//! assert_eq!(ascii, "example.com");
//!
//! let assessment = classify(Some(92.0), None, &RiskConfig::default());
//! assert_eq!(assessment.level, RiskLevel::High);
//! # Ok::<(), anyhow::Error>(())
//! ```

// Re-export all modules for library use
pub mod api;
pub mod cli;
pub mod config;
pub mod domain_utils;
pub mod errors;
pub mod models;
pub mod probe;
pub mod queue;
pub mod retry;
pub mod risk;
pub mod scanner;
pub mod service;
pub mod store;

// Re-export commonly used types and functions for convenience
pub use api::{router, AppState};
pub use config::Config;
pub use errors::{ErrorCategory, Result, TwistwatchError};
pub use models::{Domain, Permutation, PhishingMatch, Schedule, User};
pub use risk::{classify, RiskCounts, RiskLevel};
pub use scanner::{CommandScanner, ScanBackend, ScanRecord};
pub use service::{PhishingHit, ScanOutcome};
pub use store::Store;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
