//! Root-domain metadata probe.
//!
//! The external tool resolves metadata for the *permutations*; the root
//! domain's own row also carries resolved address, web-server banner, and
//! mail-server columns. This module fills them, best-effort, when a domain
//! is registered: A lookup and MX lookup through the async resolver, and a
//! single HTTP request for the `Server` header.
//!
//! Every failure degrades to a NULL column. A probe never fails a request.

use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;
use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};

use crate::config::ProbeConfig;
use crate::errors::{Result, TwistwatchError};
use crate::retry::{ProbeRetryPolicy, RetryConfigBuilder, RetryExecutor};

/// Resolved metadata for a root domain. All fields optional by design.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RootMetadata {
    pub ip_address: Option<String>,
    pub server: Option<String>,
    pub mail_server: Option<String>,
}

/// Probe client. Holds a resolver and an HTTP client, both reused across
/// requests.
pub struct RootProbe {
    resolver: TokioAsyncResolver,
    http: reqwest::Client,
    dns_timeout: Duration,
}

impl RootProbe {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!("twistwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TwistwatchError::internal_with("failed to build HTTP client", e))?;

        Ok(Self {
            resolver,
            http,
            dns_timeout: config.dns_timeout,
        })
    }

    /// Gather what we can about `domain`. Individual lookups time out and
    /// fail independently.
    pub async fn probe(&self, domain: &str) -> RootMetadata {
        let (ip_address, mail_server, server) = tokio::join!(
            self.lookup_a(domain),
            self.lookup_mx(domain),
            self.fetch_server_banner(domain),
        );

        let metadata = RootMetadata {
            ip_address,
            server,
            mail_server,
        };
        debug!(domain, ?metadata, "root probe finished");
        metadata
    }

    /// First resolved address (A preferred over AAAA by the resolver).
    async fn lookup_a(&self, domain: &str) -> Option<String> {
        let executor = RetryExecutor::new(
            RetryConfigBuilder::new()
                .max_attempts(1)
                .initial_delay(Duration::from_millis(200))
                .build(),
        );

        let lookup = executor
            .execute(
                || async {
                    timeout(self.dns_timeout, self.resolver.lookup_ip(domain))
                        .await
                        .map_err(|_| trust_dns_resolver::error::ResolveError::from("timed out"))?
                },
                ProbeRetryPolicy,
            )
            .await;

        match lookup {
            Ok(response) => response.iter().next().map(|ip| ip.to_string()),
            Err(e) => {
                debug!(domain, error = %e, "A lookup failed");
                None
            }
        }
    }

    /// Preferred MX exchange (lowest preference value), trailing dot trimmed.
    async fn lookup_mx(&self, domain: &str) -> Option<String> {
        let lookup = timeout(self.dns_timeout, self.resolver.mx_lookup(domain)).await;

        match lookup {
            Ok(Ok(response)) => response
                .iter()
                .min_by_key(|mx| mx.preference())
                .map(|mx| trim_fqdn(mx.exchange().to_utf8())),
            Ok(Err(e)) => {
                debug!(domain, error = %e, "MX lookup failed");
                None
            }
            Err(_) => {
                debug!(domain, "MX lookup timed out");
                None
            }
        }
    }

    /// `Server` response header, trying https first then plain http.
    async fn fetch_server_banner(&self, domain: &str) -> Option<String> {
        for url in [format!("https://{domain}"), format!("http://{domain}")] {
            match self.http.get(&url).send().await {
                Ok(resp) => {
                    let banner = resp
                        .headers()
                        .get("server")
                        .and_then(|h| h.to_str().ok())
                        .map(|s| s.to_string());
                    if banner.is_some() {
                        return banner;
                    }
                    // Reached the host but it sent no Server header; the
                    // http fallback would not do better.
                    return None;
                }
                Err(e) => {
                    debug!(domain, url, error = %e, "banner request failed");
                    continue;
                }
            }
        }
        None
    }
}

/// Remove the trailing dot DNS names carry.
fn trim_fqdn(name: String) -> String {
    name.trim_end_matches('.').to_string()
}
