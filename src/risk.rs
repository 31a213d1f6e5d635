//! Risk classification for scanned permutations.
//!
//! Similarity scores arrive from the external tool (fuzzy hash and
//! perceptual hash, both 0-100); this module only thresholds them into
//! bands and aggregates per-level counts for the domains listing.

use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;

/// Risk band assigned to a permutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Unknown,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Unknown => "unknown",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    /// Parse the stored TEXT column back into a level.
    /// Anything unrecognized is treated as unknown rather than an error.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "low" => RiskLevel::Low,
            "medium" => RiskLevel::Medium,
            "high" => RiskLevel::High,
            _ => RiskLevel::Unknown,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one scan record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskAssessment {
    /// Effective score: the stronger of the two hash similarities.
    pub score: Option<f64>,
    pub level: RiskLevel,
}

impl RiskAssessment {
    /// True when the score reaches the phishing (high) threshold.
    pub fn is_phishing(&self) -> bool {
        self.level == RiskLevel::High
    }
}

/// Threshold the tool-provided similarities into a band.
///
/// A permutation with no hash data at all (typically unregistered or
/// unreachable) is `Unknown`, not `Low`: absence of evidence is surfaced
/// as its own state so the review UI can distinguish "looked safe" from
/// "never compared".
pub fn classify(tlsh: Option<f64>, phash: Option<f64>, thresholds: &RiskConfig) -> RiskAssessment {
    let score = match (tlsh, phash) {
        (Some(t), Some(p)) => Some(t.max(p)),
        (Some(t), None) => Some(t),
        (None, Some(p)) => Some(p),
        (None, None) => None,
    };

    let level = match score {
        None => RiskLevel::Unknown,
        Some(s) if s >= thresholds.high_threshold => RiskLevel::High,
        Some(s) if s >= thresholds.medium_threshold => RiskLevel::Medium,
        Some(s) if s > 0.0 => RiskLevel::Low,
        Some(_) => RiskLevel::Unknown,
    };

    RiskAssessment { score, level }
}

/// Per-level tallies shown alongside each domain and aggregated per user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskCounts {
    pub high: i64,
    pub medium: i64,
    pub low: i64,
    pub unknown: i64,
}

impl RiskCounts {
    pub fn add(&mut self, level: RiskLevel, count: i64) {
        match level {
            RiskLevel::High => self.high += count,
            RiskLevel::Medium => self.medium += count,
            RiskLevel::Low => self.low += count,
            RiskLevel::Unknown => self.unknown += count,
        }
    }

    pub fn merge(&mut self, other: &RiskCounts) {
        self.high += other.high;
        self.medium += other.medium;
        self.low += other.low;
        self.unknown += other.unknown;
    }

    pub fn total(&self) -> i64 {
        self.high + self.medium + self.low + self.unknown
    }
}
