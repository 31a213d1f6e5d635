//! High-level orchestration over the store, scanner, and probe.
//!
//! This abstracts the flow otherwise confined to the API handlers and
//! offers stable entry points for embedding inside other Rust applications
//! or services:
//! - `register_domain`: validate input, probe root metadata, insert the row.
//! - `scan_domain`: one subprocess scan, classify, upsert, record matches.
//!
//! Handlers stay thin; everything with more than one step lives here.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RiskConfig;
use crate::domain_utils;
use crate::errors::{Result, TwistwatchError};
use crate::models::{Domain, NewPhishingMatch, Permutation};
use crate::probe::RootProbe;
use crate::risk;
use crate::scanner::ScanBackend;
use crate::store::Store;

/// One permutation that crossed the phishing threshold during a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhishingHit {
    pub domain: String,
    /// Unicode display form of the permutation name.
    pub display_name: String,
    pub similarity: f64,
    pub url: Option<String>,
    /// Which hashing mode flagged it ("lsh" or "phash").
    pub method: String,
}

/// Result of one scan request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub scanned_domain: String,
    pub total_records: usize,
    pub new_permutations: usize,
    pub updated_permutations: usize,
    pub phishing_matches: Vec<PhishingHit>,
}

/// Validate a root domain for `user_id`, enrich it with probed metadata,
/// and persist it.
pub async fn register_domain(
    store: &Store,
    probe: Option<&RootProbe>,
    user_id: &str,
    raw_domain: &str,
) -> Result<Domain> {
    if store.get_user(user_id).await?.is_none() {
        return Err(TwistwatchError::user_not_found(user_id));
    }

    let domain_name = domain_utils::validate_root_domain(raw_domain)
        .map_err(|e| TwistwatchError::invalid_domain(raw_domain, e.to_string()))?;

    if store.get_domain(&domain_name).await?.is_some() {
        return Err(TwistwatchError::DomainExists {
            domain: domain_name,
        });
    }

    let metadata = match probe {
        Some(p) => p.probe(&domain_name).await,
        None => Default::default(),
    };

    let domain = Domain {
        domain_name,
        user_id: user_id.to_string(),
        last_scan: None,
        total_scans: 0,
        ip_address: metadata.ip_address,
        server: metadata.server,
        mail_server: metadata.mail_server,
    };
    store.insert_domain(&domain).await?;

    info!(domain = %domain.domain_name, user_id, "domain registered");
    Ok(domain)
}

/// Run one scan of `domain_name` and fold the results into the store.
///
/// The upsert-by-primary-key loop: existing column values win, new values
/// only fill gaps, and the risk band is recomputed from the merged hashes.
/// Records whose fresh similarity reaches the high threshold are also
/// recorded as phishing matches.
pub async fn scan_domain(
    store: &Store,
    scanner: &dyn ScanBackend,
    thresholds: &RiskConfig,
    domain_name: &str,
) -> Result<ScanOutcome> {
    let domain = store
        .get_domain(domain_name)
        .await?
        .ok_or_else(|| TwistwatchError::domain_not_found(domain_name))?;

    let records = scanner.scan(&domain.domain_name).await?;
    debug!(domain = %domain.domain_name, records = records.len(), "processing scan records");

    let mut outcome = ScanOutcome {
        scanned_domain: domain.domain_name.clone(),
        total_records: records.len(),
        new_permutations: 0,
        updated_permutations: 0,
        phishing_matches: Vec::new(),
    };

    for record in &records {
        let Some(ref permutation_name) = record.domain else {
            continue; // nameless records are tool noise
        };

        let existing = store.get_permutation(permutation_name).await?;
        let is_new = existing.is_none();

        // Existing values win; fresh data only fills gaps.
        let (prev_fuzzer, prev_ip, prev_server, prev_mx, prev_tlsh, prev_phash) = match existing {
            Some(p) => (p.fuzzer, p.ip_address, p.server, p.mail_server, p.tlsh, p.phash),
            None => (None, None, None, None, None, None),
        };

        let tlsh = prev_tlsh.or(record.fuzzy_hash_similarity);
        let phash = prev_phash.or(record.phash_similarity);
        let assessment = risk::classify(tlsh, phash, thresholds);

        let permutation = Permutation {
            permutation_name: permutation_name.clone(),
            domain_name: domain.domain_name.clone(),
            fuzzer: prev_fuzzer.or_else(|| record.fuzzer.clone()),
            ip_address: prev_ip.or_else(|| record.ip_address()),
            server: prev_server.or_else(|| record.server()),
            mail_server: prev_mx.or_else(|| record.mail_server()),
            tlsh,
            phash,
            risk: assessment.score,
            risk_level: assessment.level.as_str().to_string(),
        };
        store.save_permutation(&permutation).await?;

        if is_new {
            outcome.new_permutations += 1;
        } else {
            outcome.updated_permutations += 1;
        }

        // Phishing matches are driven by the fresh scan data, not the
        // merged history: a hit is something this scan observed.
        let fresh =
            risk::classify(record.fuzzy_hash_similarity, record.phash_similarity, thresholds);
        if fresh.is_phishing() {
            let similarity = fresh.score.unwrap_or_default();
            let method = flagging_method(record.fuzzy_hash_similarity, thresholds);

            store
                .record_phishing_match(&NewPhishingMatch {
                    domain_name: domain.domain_name.clone(),
                    permutation_name: permutation_name.clone(),
                    url: record.url.clone(),
                    similarity_score: similarity,
                    method: method.to_string(),
                })
                .await?;

            outcome.phishing_matches.push(PhishingHit {
                domain: permutation_name.clone(),
                display_name: domain_utils::to_display(permutation_name),
                similarity,
                url: record.url.clone(),
                method: method.to_string(),
            });
        }
    }

    store.bump_scan_stats(&domain.domain_name, Utc::now()).await?;

    info!(
        domain = %domain.domain_name,
        new = outcome.new_permutations,
        updated = outcome.updated_permutations,
        phishing = outcome.phishing_matches.len(),
        "scan complete"
    );
    Ok(outcome)
}

/// Which hashing mode pushed the score over the threshold.
fn flagging_method(tlsh: Option<f64>, thresholds: &RiskConfig) -> &'static str {
    match tlsh {
        Some(t) if t >= thresholds.high_threshold => "lsh",
        _ => "phash",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::risk::RiskLevel;
    use crate::scanner::{OneOrMany, ScanRecord};
    use async_trait::async_trait;

    /// Scanner backend that replays canned records.
    struct FixtureScanner {
        records: Vec<ScanRecord>,
    }

    #[async_trait]
    impl ScanBackend for FixtureScanner {
        fn name(&self) -> &'static str {
            "fixture"
        }

        async fn scan(&self, _domain: &str) -> Result<Vec<ScanRecord>> {
            Ok(self.records.clone())
        }
    }

    fn record(name: &str, tlsh: Option<f64>, phash: Option<f64>) -> ScanRecord {
        ScanRecord {
            domain: Some(name.to_string()),
            fuzzer: Some("homoglyph".to_string()),
            dns_a: Some(OneOrMany::Many(vec!["203.0.113.5".to_string()])),
            url: Some(format!("http://{name}/")),
            fuzzy_hash_similarity: tlsh,
            phash_similarity: phash,
            ..ScanRecord::default()
        }
    }

    async fn seeded_store() -> (Store, User) {
        let store = Store::connect_in_memory().await.unwrap();
        let (user, _) = store.create_or_get_user("tester").await.unwrap();
        store
            .insert_domain(&Domain {
                domain_name: "example.com".into(),
                user_id: user.user_id.clone(),
                last_scan: None,
                total_scans: 0,
                ip_address: None,
                server: None,
                mail_server: None,
            })
            .await
            .unwrap();
        (store, user)
    }

    #[tokio::test]
    async fn scan_classifies_and_records_matches() {
        let (store, _user) = seeded_store().await;
        let scanner = FixtureScanner {
            records: vec![
                record("examp1e.com", Some(92.0), None),
                record("examlpe.com", Some(35.0), None),
                record("unregistered.com", None, None),
                ScanRecord::default(), // nameless noise
            ],
        };

        let outcome = scan_domain(&store, &scanner, &RiskConfig::default(), "example.com")
            .await
            .unwrap();

        assert_eq!(outcome.total_records, 4);
        assert_eq!(outcome.new_permutations, 3);
        assert_eq!(outcome.updated_permutations, 0);
        assert_eq!(outcome.phishing_matches.len(), 1);
        assert_eq!(outcome.phishing_matches[0].domain, "examp1e.com");
        assert_eq!(outcome.phishing_matches[0].method, "lsh");

        let rows = store.list_permutations("example.com").await.unwrap();
        assert_eq!(rows.len(), 3);
        let high = rows
            .iter()
            .find(|p| p.permutation_name == "examp1e.com")
            .unwrap();
        assert_eq!(high.level(), RiskLevel::High);
        let unknown = rows
            .iter()
            .find(|p| p.permutation_name == "unregistered.com")
            .unwrap();
        assert_eq!(unknown.level(), RiskLevel::Unknown);

        let matches = store.list_phishing_matches("example.com").await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].similarity_score, 92.0);

        let domain = store.get_domain("example.com").await.unwrap().unwrap();
        assert_eq!(domain.total_scans, 1);
        assert!(domain.last_scan.is_some());
    }

    #[tokio::test]
    async fn rescan_fills_gaps_without_clobbering() {
        let (store, _user) = seeded_store().await;

        // First scan: registered but no hash data yet.
        let first = FixtureScanner {
            records: vec![ScanRecord {
                domain: Some("examp1e.com".to_string()),
                fuzzer: Some("homoglyph".to_string()),
                dns_a: Some(OneOrMany::One("203.0.113.5".to_string())),
                ..ScanRecord::default()
            }],
        };
        scan_domain(&store, &first, &RiskConfig::default(), "example.com")
            .await
            .unwrap();

        let row = store.get_permutation("examp1e.com").await.unwrap().unwrap();
        assert_eq!(row.level(), RiskLevel::Unknown);
        assert_eq!(row.ip_address.as_deref(), Some("203.0.113.5"));

        // Second scan: hashes appear, the address column is absent. The
        // stored address must survive, the band must be recomputed.
        let second = FixtureScanner {
            records: vec![ScanRecord {
                domain: Some("examp1e.com".to_string()),
                fuzzy_hash_similarity: Some(88.0),
                banner_http: Some("nginx".to_string()),
                ..ScanRecord::default()
            }],
        };
        let outcome = scan_domain(&store, &second, &RiskConfig::default(), "example.com")
            .await
            .unwrap();
        assert_eq!(outcome.new_permutations, 0);
        assert_eq!(outcome.updated_permutations, 1);

        let row = store.get_permutation("examp1e.com").await.unwrap().unwrap();
        assert_eq!(row.ip_address.as_deref(), Some("203.0.113.5"));
        assert_eq!(row.server.as_deref(), Some("nginx"));
        assert_eq!(row.tlsh, Some(88.0));
        assert_eq!(row.level(), RiskLevel::High);
        assert_eq!(row.fuzzer.as_deref(), Some("homoglyph"));
    }

    #[tokio::test]
    async fn phash_flags_when_lsh_is_quiet() {
        let (store, _user) = seeded_store().await;
        let scanner = FixtureScanner {
            records: vec![record("examp1e.com", Some(20.0), Some(97.0))],
        };

        let outcome = scan_domain(&store, &scanner, &RiskConfig::default(), "example.com")
            .await
            .unwrap();
        assert_eq!(outcome.phishing_matches.len(), 1);
        assert_eq!(outcome.phishing_matches[0].method, "phash");
        assert_eq!(outcome.phishing_matches[0].similarity, 97.0);
    }

    #[tokio::test]
    async fn scan_unknown_domain_is_not_found() {
        let store = Store::connect_in_memory().await.unwrap();
        let scanner = FixtureScanner { records: vec![] };
        let err = scan_domain(&store, &scanner, &RiskConfig::default(), "ghost.com")
            .await
            .unwrap_err();
        assert!(matches!(err, TwistwatchError::DomainNotFound { .. }));
    }

    #[tokio::test]
    async fn register_domain_validates_and_normalizes() {
        let store = Store::connect_in_memory().await.unwrap();
        let (user, _) = store.create_or_get_user("tester").await.unwrap();

        let domain = register_domain(&store, None, &user.user_id, "HTTPS://Example.COM/login")
            .await
            .unwrap();
        assert_eq!(domain.domain_name, "example.com");
        assert_eq!(domain.total_scans, 0);

        // Duplicate registration conflicts.
        let err = register_domain(&store, None, &user.user_id, "example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, TwistwatchError::DomainExists { .. }));

        // Unknown user 404s.
        let err = register_domain(&store, None, "ghost", "other.com")
            .await
            .unwrap_err();
        assert!(matches!(err, TwistwatchError::UserNotFound { .. }));

        // Invalid input 400s.
        let err = register_domain(&store, None, &user.user_id, "not a domain")
            .await
            .unwrap_err();
        assert!(matches!(err, TwistwatchError::InvalidDomain { .. }));
    }

    #[tokio::test]
    async fn idn_hit_carries_display_name() {
        let (store, _user) = seeded_store().await;
        let scanner = FixtureScanner {
            records: vec![record("xn--mnchen-3ya.de", Some(90.0), None)],
        };

        let outcome = scan_domain(&store, &scanner, &RiskConfig::default(), "example.com")
            .await
            .unwrap();
        assert_eq!(outcome.phishing_matches[0].display_name, "münchen.de");
    }
}
