//! Domain utilities with Public Suffix List integration.
//!
//! This module provides validation and normalization of root-domain input
//! before it reaches the scanner or the database, using the Public Suffix
//! List (PSL) to properly handle complex domains like:
//! - subdomain.example.co.uk -> example.co.uk
//! - subdomain.example.com -> example.com
//! - subdomain.github.io -> subdomain.github.io (github.io is a public suffix)
//!
//! Internationalized names are stored and scanned in their IDNA ASCII
//! (punycode) form; `to_display` recovers the Unicode form for API output.

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use psl::{domain_str, suffix_str};
use regex::Regex;

/// Maximum total length of a domain name in ASCII form.
const MAX_DOMAIN_LEN: usize = 253;

/// Maximum length of a single label.
const MAX_LABEL_LEN: usize = 63;

static LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("static label pattern"));

/// Domain information extracted using PSL or fallback parsing
#[derive(Debug, Clone, PartialEq)]
pub struct DomainInfo {
    /// The full domain as provided (normalized)
    pub full_domain: String,
    /// The registrable domain (what you can actually register)
    pub registrable_domain: Option<String>,
    /// The subdomain part (if any)
    pub subdomain: Option<String>,
    /// The public suffix (TLD or effective TLD)
    pub suffix: Option<String>,
    /// Whether this domain is itself a public suffix
    pub is_public_suffix: bool,
}

impl DomainInfo {
    /// Parse a domain string into structured domain information
    pub fn parse(domain: &str) -> Result<Self> {
        let clean_domain = clean_domain_input(domain)?;
        Ok(Self::parse_with_psl(&clean_domain))
    }

    fn parse_with_psl(domain: &str) -> Self {
        let mut registrable_domain = domain_str(domain).map(|s| s.to_string());
        let mut subdomain = registrable_domain
            .as_ref()
            .and_then(|reg| subdomain_for(domain, reg));

        if registrable_domain.is_none() {
            let (fallback_reg, fallback_sub) = fallback_registrable_domain(domain);
            registrable_domain = fallback_reg;
            subdomain = fallback_sub;
        }

        let mut suffix = suffix_str(domain).map(|s| s.to_string());
        if suffix.is_none() {
            suffix = domain.split('.').skip(1).last().map(|s| s.to_string());
        }
        if suffix.as_ref().map(|s| s.is_empty()).unwrap_or(false) {
            suffix = None;
        }

        let is_public_suffix = suffix.as_ref().map(|s| s == domain).unwrap_or(false)
            && domain_str(domain).is_none();

        DomainInfo {
            full_domain: domain.to_string(),
            registrable_domain,
            subdomain,
            suffix,
            is_public_suffix,
        }
    }
}

/// Normalize and validate a root-domain input, returning its IDNA ASCII form.
///
/// Accepts bare domains, URLs, and email addresses (the host part is used).
/// Rejects empty input, oversized names, malformed labels, single-label
/// names, and bare public suffixes.
pub fn validate_root_domain(input: &str) -> Result<String> {
    let cleaned = clean_domain_input(input)?;
    let ascii = to_ascii(&cleaned)?;

    if ascii.len() > MAX_DOMAIN_LEN {
        return Err(anyhow!(
            "domain exceeds {MAX_DOMAIN_LEN} characters ({} given)",
            ascii.len()
        ));
    }

    let labels: Vec<&str> = ascii.split('.').collect();
    if labels.len() < 2 {
        return Err(anyhow!("single-label names cannot be scanned"));
    }

    for label in &labels {
        if label.len() > MAX_LABEL_LEN {
            return Err(anyhow!("label '{label}' exceeds {MAX_LABEL_LEN} characters"));
        }
        if !LABEL_RE.is_match(label) {
            return Err(anyhow!("label '{label}' contains invalid characters"));
        }
    }

    let info = DomainInfo::parse_with_psl(&ascii);
    if info.is_public_suffix {
        return Err(anyhow!("'{ascii}' is a public suffix, not a registrable domain"));
    }

    Ok(ascii)
}

/// Convert a domain to IDNA ASCII (punycode) form.
pub fn to_ascii(domain: &str) -> Result<String> {
    idna::domain_to_ascii(domain).map_err(|e| anyhow!("IDNA conversion failed: {e:?}"))
}

/// Convert a stored ASCII domain back to its Unicode display form.
/// Falls back to the input when decoding fails.
pub fn to_display(domain: &str) -> String {
    let (decoded, result) = idna::domain_to_unicode(domain);
    if result.is_ok() {
        decoded
    } else {
        domain.to_string()
    }
}

/// Extract registrable domain from a hostname or domain string
pub fn extract_registrable_domain(domain: &str) -> Option<String> {
    DomainInfo::parse(domain).ok()?.registrable_domain
}

/// Clean domain input by removing common artifacts
fn clean_domain_input(domain: &str) -> Result<String> {
    let mut clean = domain.trim().to_lowercase();

    // Email address: keep the host part.
    if let Some(idx) = clean.rfind('@') {
        clean = clean[idx + 1..].to_string();
    }

    // URL artifacts: scheme, path, port.
    clean = clean
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .split('/')
        .next()
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("")
        .trim_end_matches('.')
        .to_string();

    if clean.is_empty() {
        return Err(anyhow!("empty domain"));
    }

    Ok(clean)
}

fn subdomain_for(full_domain: &str, registrable: &str) -> Option<String> {
    if full_domain == registrable {
        return None;
    }
    if full_domain.len() <= registrable.len() {
        return None;
    }
    if !full_domain.ends_with(registrable) {
        return None;
    }
    let prefix_len = full_domain.len() - registrable.len() - 1;
    if prefix_len == 0 || prefix_len >= full_domain.len() {
        None
    } else {
        Some(full_domain[..prefix_len].to_string())
    }
}

fn fallback_registrable_domain(domain: &str) -> (Option<String>, Option<String>) {
    let parts: Vec<&str> = domain.split('.').collect();
    if parts.len() < 2 {
        return (Some(domain.to_string()), None);
    }
    let registrable = format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1]);
    let subdomain = if parts.len() > 2 {
        Some(parts[..parts.len() - 2].join("."))
    } else {
        None
    };
    (Some(registrable), subdomain)
}
