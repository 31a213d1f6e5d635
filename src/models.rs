//! Row types shared between the store and the API layer.
//!
//! These map 1:1 onto the tables the store creates; handlers serialize them
//! directly, so field names are part of the wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::risk::{RiskCounts, RiskLevel};

/// An account that owns monitored domains.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub user_name: String,
}

/// A monitored root domain.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Domain {
    pub domain_name: String,
    pub user_id: String,
    pub last_scan: Option<DateTime<Utc>>,
    pub total_scans: i64,
    pub ip_address: Option<String>,
    pub server: Option<String>,
    pub mail_server: Option<String>,
}

/// One candidate lookalike produced by the external tool.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Permutation {
    pub permutation_name: String,
    pub domain_name: String,
    pub fuzzer: Option<String>,
    pub ip_address: Option<String>,
    pub server: Option<String>,
    pub mail_server: Option<String>,
    /// Fuzzy-hash similarity (0-100), when the tool produced one.
    pub tlsh: Option<f64>,
    /// Perceptual-hash similarity (0-100), when the tool produced one.
    pub phash: Option<f64>,
    /// Effective risk score (max of the two similarities).
    pub risk: Option<f64>,
    /// Stored band; see [`RiskLevel`].
    pub risk_level: String,
}

impl Permutation {
    pub fn level(&self) -> RiskLevel {
        RiskLevel::from_str_lossy(&self.risk_level)
    }
}

/// A stored timestamp for a domain's next automated re-scan.
/// Nothing in this service consumes it; management is plain CRUD.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Schedule {
    pub schedule_id: String,
    pub schedule_name: String,
    pub domain_name: String,
    pub start_date: DateTime<Utc>,
    pub next_scan: Option<DateTime<Utc>>,
}

/// A permutation whose similarity score crossed the phishing threshold.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PhishingMatch {
    pub id: i64,
    pub domain_name: String,
    pub permutation_name: String,
    pub url: Option<String>,
    pub similarity_score: f64,
    /// Which hashing mode flagged it ("lsh" or "phash").
    pub method: String,
    pub created_at: DateTime<Utc>,
}

/// Insert form of [`PhishingMatch`] (id and timestamp assigned by the store).
#[derive(Debug, Clone)]
pub struct NewPhishingMatch {
    pub domain_name: String,
    pub permutation_name: String,
    pub url: Option<String>,
    pub similarity_score: f64,
    pub method: String,
}

/// A domain plus its per-level permutation tallies, as returned by the
/// domains listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainWithRisk {
    #[serde(flatten)]
    pub domain: Domain,
    pub risk_counts: RiskCounts,
}
