//! External fuzzing-tool invocation.
//!
//! Permutation generation, DNS resolution, banner grabbing, and hash
//! similarity all happen inside an external CLI tool; this module spawns it
//! once per scan request, captures stdout, and maps the emitted JSON array
//! into typed records. Nothing here interprets the results beyond field
//! extraction.
//!
//! `ScanBackend` is the seam: the production implementation shells out,
//! tests substitute a fixture.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ScannerConfig;
use crate::errors::{Result, TwistwatchError};

/// A JSON field that the tool emits either as a scalar or as a list,
/// depending on how many records a lookup returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    /// First value, if any.
    pub fn first(&self) -> Option<&str> {
        match self {
            OneOrMany::One(s) => Some(s.as_str()),
            OneOrMany::Many(v) => v.first().map(|s| s.as_str()),
        }
    }
}

/// One permutation record as emitted by the external tool.
///
/// Every field is optional: unregistered permutations carry only the name
/// and fuzzer, and similarity data appears only when the corresponding
/// hashing mode was requested and the target was reachable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanRecord {
    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub fuzzer: Option<String>,

    #[serde(default)]
    pub dns_a: Option<OneOrMany>,

    #[serde(default)]
    pub dns_aaaa: Option<OneOrMany>,

    #[serde(default)]
    pub dns_mx: Option<OneOrMany>,

    #[serde(default, alias = "http_server")]
    pub banner_http: Option<String>,

    /// Fuzzy-hash (LSH) similarity against the root domain's page, 0-100.
    #[serde(default, alias = "tlsh")]
    pub fuzzy_hash_similarity: Option<f64>,

    /// Perceptual-hash similarity against the root domain's page, 0-100.
    #[serde(default, alias = "phash")]
    pub phash_similarity: Option<f64>,

    #[serde(default)]
    pub url: Option<String>,
}

impl ScanRecord {
    /// Resolved address for the permutation: first A record, else first AAAA.
    pub fn ip_address(&self) -> Option<String> {
        self.dns_a
            .as_ref()
            .and_then(|v| v.first())
            .or_else(|| self.dns_aaaa.as_ref().and_then(|v| v.first()))
            .map(|s| s.to_string())
    }

    /// First MX host, if the permutation has mail infrastructure.
    pub fn mail_server(&self) -> Option<String> {
        self.dns_mx
            .as_ref()
            .and_then(|v| v.first())
            .map(|s| s.to_string())
    }

    /// HTTP server banner, if one was grabbed.
    pub fn server(&self) -> Option<String> {
        self.banner_http.clone()
    }
}

/// Parse the tool's stdout into records.
pub fn parse_scan_output(stdout: &[u8]) -> Result<Vec<ScanRecord>> {
    serde_json::from_slice::<Vec<ScanRecord>>(stdout)
        .map_err(|e| TwistwatchError::scanner_output(e.to_string()))
}

/// Trait every permutation-scan backend must implement.
#[async_trait]
pub trait ScanBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one scan of `domain` and return the raw records.
    async fn scan(&self, domain: &str) -> Result<Vec<ScanRecord>>;
}

/// Production backend: spawns the configured CLI tool as a subprocess.
pub struct CommandScanner {
    config: ScannerConfig,
}

impl CommandScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, domain: &str) -> Vec<String> {
        let mut args = vec![
            "--lsh".to_string(),
            self.config.lsh_algorithm.clone(),
            "--mx".to_string(),
            "--banner".to_string(),
        ];
        if self.config.use_phash {
            args.push("--phash".to_string());
        }
        if self.config.registered_only {
            args.push("--registered".to_string());
        }
        args.push("--format".to_string());
        args.push("json".to_string());
        args.push(domain.to_string());
        args
    }
}

#[async_trait]
impl ScanBackend for CommandScanner {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn scan(&self, domain: &str) -> Result<Vec<ScanRecord>> {
        let args = self.build_args(domain);
        debug!(binary = %self.config.binary, ?args, "spawning scanner");

        let child = Command::new(&self.config.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.config.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(TwistwatchError::ScannerSpawn {
                    binary: self.config.binary.clone(),
                    source: e,
                })
            }
            Err(_) => {
                warn!(domain, timeout = ?self.config.timeout, "scanner timed out");
                return Err(TwistwatchError::ScannerTimeout {
                    domain: domain.to_string(),
                    seconds: self.config.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TwistwatchError::ScannerFailed {
                binary: self.config.binary.clone(),
                status: output.status.to_string(),
                stderr: truncate(stderr.trim(), 400),
            });
        }

        let records = parse_scan_output(&output.stdout)?;
        debug!(domain, records = records.len(), "scanner finished");
        Ok(records)
    }
}

/// Keep scanner stderr in error messages bounded.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
