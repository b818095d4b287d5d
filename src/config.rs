use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::address::{lookup_address, ParsedAddress, Resolver};
use crate::error::{AddressError, ConfigError};
use crate::logger::Logger;

/// Tunables supplied by the embedding application.
///
/// A limit of zero disables the corresponding disconnect check.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_address: IpAddr,
    /// IANA assigns 2424 to LMTP.
    pub port: u16,
    /// Above this many live sessions, accepting slows down.
    pub soft_limit: usize,
    /// At this many live sessions, nothing more is accepted.
    pub hard_limit: usize,
    pub backoff: Duration,
    /// Announced in the greeting, the capability block and the sign-off.
    pub host_name: String,
    pub inactivity_timeout: Duration,
    pub max_errors: u32,
    /// Unimplemented commands count as NOOPs.
    pub max_noops: u32,
    /// The implicit RSET at the start of every session counts, so 1 forbids
    /// any explicit RSET.
    pub max_rsets: u32,
    /// Resolve sender domains, and served domains at startup.
    pub live_lookups: bool,
    /// How long a read waits for a complete line before reporting no data.
    pub read_defer: Duration,
    /// Pause between session loop iterations.
    pub loop_delay: Duration,
    /// Longest accepted line in bytes, terminator included. 0 means no limit.
    pub max_line_length: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 2424,
            soft_limit: 100,
            hard_limit: 150,
            backoff: Duration::from_millis(200),
            host_name: String::new(),
            inactivity_timeout: Duration::from_millis(30_000),
            max_errors: 3,
            max_noops: 5,
            max_rsets: 3,
            live_lookups: true,
            read_defer: Duration::from_millis(250),
            loop_delay: Duration::from_millis(5),
            // RFC 5321 text line limit.
            max_line_length: 1000,
        }
    }
}

/// Immutable server configuration shared by the listener and every session.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub settings: Settings,
    pub approved_hosts: HashSet<ParsedAddress>,
    pub domains_served: HashSet<String>,
    capabilities: String,
}

impl ServerConfig {
    /// Build the allow-sets. Entries that fail to parse or resolve are logged
    /// and skipped; they never abort startup.
    pub async fn build(
        settings: Settings,
        approved_hosts: &[String],
        domains_served: &[String],
        resolver: Arc<dyn Resolver>,
        logger: &Logger,
    ) -> Result<Self, ConfigError> {
        if settings.hard_limit == 0 {
            return Err(ConfigError::NoConnectionSlots);
        }

        let mut hosts = HashSet::new();
        for host in approved_hosts {
            let host = host.trim();
            match lookup_address(host.to_owned(), resolver.clone()).await {
                Ok(addr) => {
                    hosts.insert(addr);
                }
                Err(AddressError::InvalidAddress(_)) => {
                    logger
                        .log(
                            "config",
                            &format!(
                                "Could not add {} to approved hosts: invalid numeric format \
                                 (use a.b.c.d or all eight groups of n:n:n:n:n:n:n:n)",
                                host
                            ),
                        )
                        .await;
                }
                Err(AddressError::UnresolvedHost(_)) => {
                    logger
                        .log(
                            "config",
                            &format!("Could not add {} to approved hosts: unknown host", host),
                        )
                        .await;
                }
            }
        }

        let mut domains = HashSet::new();
        for domain in domains_served {
            let domain = domain.trim().to_lowercase();
            if settings.live_lookups {
                if let Err(e) = lookup_address(domain.clone(), resolver.clone()).await {
                    logger
                        .log(
                            "config",
                            &format!("Could not add domain {} to domains served: {}", domain, e),
                        )
                        .await;
                    continue;
                }
            }
            domains.insert(domain);
        }

        Ok(Self::from_parts(settings, hosts, domains))
    }

    /// Assemble a configuration from already-validated sets.
    pub fn from_parts(
        settings: Settings,
        approved_hosts: HashSet<ParsedAddress>,
        domains_served: HashSet<String>,
    ) -> Self {
        let capabilities = format!("250-{}\r\n250-PIPELINING\r\n250 SIZE", settings.host_name);
        Self {
            settings,
            approved_hosts,
            domains_served,
            capabilities,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.settings.bind_address, self.settings.port)
    }

    /// The LHLO reply, without the final line terminator.
    pub fn capabilities(&self) -> &str {
        &self.capabilities
    }

    pub fn is_approved(&self, peer: IpAddr) -> bool {
        self.approved_hosts.contains(&ParsedAddress::from(peer))
    }

    pub fn serves_domain(&self, domain: &str) -> bool {
        self.domains_served.contains(domain)
    }
}
