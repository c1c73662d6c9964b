//! DNS resolution for remote delivery.
//!
//! MX records are looked up first and returned in preference order. A domain without MX
//! records is treated as its own mail server via its A/AAAA records (RFC 5321 section 5.1).

use std::time::Duration;

use hickory_resolver::{TokioResolver, config::ResolverOpts, name_server::TokioConnectionProvider};
use serde::Deserialize;
use thiserror::Error;
use hermod_common::internal;

/// Port used for servers discovered through DNS.
pub const SMTP_PORT: u16 = 25;

#[derive(Debug, Error)]
pub enum DnsError {
    /// No MX, A, or AAAA records found for the domain.
    #[error("No mail servers found for domain: {0}")]
    NoMailServers(String),

    /// DNS query failed due to network or resolver issues.
    #[error("DNS lookup failed: {0}")]
    LookupFailed(#[from] hickory_resolver::ResolveError),
}

const fn default_timeout_secs() -> u64 {
    5
}

/// The `dns` section of the transport configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DnsConfig {
    /// Per-query timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// A host that accepts mail for a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailServer {
    pub host: String,
    /// MX preference, lower first. 0 for A/AAAA fallback.
    pub priority: u16,
    pub port: u16,
}

impl MailServer {
    #[must_use]
    pub const fn new(host: String, priority: u16, port: u16) -> Self {
        Self {
            host,
            priority,
            port,
        }
    }

    /// `host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
}

impl DnsResolver {
    /// Builds a resolver from the system configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new(config: &DnsConfig) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self { resolver })
    }

    /// Mail servers for `domain`, most preferred first.
    ///
    /// # Errors
    ///
    /// If the lookup fails, or the domain has no MX, A, or AAAA records.
    pub async fn resolve_mail_servers(&self, domain: &str) -> Result<Vec<MailServer>, DnsError> {
        internal!(level = DEBUG, "Resolving mail servers for domain: {domain}");

        match self.resolver.mx_lookup(domain).await {
            Ok(mx_lookup) => {
                let mut servers: Vec<MailServer> = mx_lookup
                    .iter()
                    .map(|mx| {
                        let host = mx.exchange().to_utf8();
                        let host = host.trim_end_matches('.').to_string();
                        internal!(level = DEBUG, "Found MX record: {host} (priority: {})", mx.preference());
                        MailServer::new(host, mx.preference(), SMTP_PORT)
                    })
                    .collect();

                if servers.is_empty() {
                    internal!(level = DEBUG, "MX lookup returned no records, falling back to A/AAAA");
                    return self.fallback_to_a_aaaa(domain).await;
                }

                servers.sort_by_key(|server| server.priority);
                Ok(servers)
            }
            Err(err) if err.is_no_records_found() => {
                internal!(level = DEBUG, "No MX records found for {domain}, falling back to A/AAAA");
                self.fallback_to_a_aaaa(domain).await
            }
            Err(err) => {
                internal!(level = WARN, "MX lookup failed for {domain}: {err}");
                Err(DnsError::LookupFailed(err))
            }
        }
    }

    async fn fallback_to_a_aaaa(&self, domain: &str) -> Result<Vec<MailServer>, DnsError> {
        match self.resolver.lookup_ip(domain).await {
            Ok(ip_lookup) => {
                let servers: Vec<MailServer> = ip_lookup
                    .iter()
                    .map(|ip| MailServer::new(ip.to_string(), 0, SMTP_PORT))
                    .collect();

                if servers.is_empty() {
                    Err(DnsError::NoMailServers(domain.to_string()))
                } else {
                    Ok(servers)
                }
            }
            Err(err) if err.is_no_records_found() => {
                Err(DnsError::NoMailServers(domain.to_string()))
            }
            Err(err) => {
                internal!(level = WARN, "A/AAAA lookup failed for {domain}: {err}");
                Err(DnsError::LookupFailed(err))
            }
        }
    }
}
