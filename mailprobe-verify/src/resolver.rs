//! Mail exchanger discovery.
//!
//! [`DnsResolver`] follows RFC 5321 section 5.1: MX records first, then the
//! domain's own A/AAAA records as an implicit MX. [`CachedResolver`] wraps
//! any resolver with the coordination cache.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use hickory_resolver::{
    TokioResolver,
    config::{ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
};
use mailprobe_common::Exchanger;
use mailprobe_coord::CacheLayer;
use tracing::{debug, warn};

use crate::error::ResolveError;

/// Source of mail exchangers for a domain.
///
/// `Ok(vec![])` means the domain definitively accepts no mail. `Err` is
/// always transient.
#[async_trait]
pub trait MxResolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> Result<Vec<Exchanger>, ResolveError>;
}

fn is_definitive_miss(err: &hickory_resolver::ResolveError) -> bool {
    err.is_no_records_found() || err.is_nx_domain()
}

#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
}

impl DnsResolver {
    /// Uses the system resolver configuration.
    pub fn new(timeout: Duration) -> Result<Self, ResolveError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self { resolver })
    }

    #[must_use]
    pub fn with_resolver_config(config: ResolverConfig, opts: ResolverOpts) -> Self {
        let resolver =
            TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
                .with_options(opts)
                .build();

        Self { resolver }
    }

    async fn implicit_mx(&self, domain: &str) -> Result<Vec<Exchanger>, ResolveError> {
        debug!("No MX records for {domain}, falling back to A/AAAA");

        match self.resolver.lookup_ip(domain).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|ip| Exchanger::new(ip.to_string(), 0))
                .collect()),
            Err(err) if is_definitive_miss(&err) => Ok(Vec::new()),
            Err(source) => {
                warn!("A/AAAA lookup failed for {domain}: {source}");
                Err(ResolveError::LookupFailed {
                    domain: domain.to_string(),
                    source,
                })
            }
        }
    }
}

#[async_trait]
impl MxResolver for DnsResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<Exchanger>, ResolveError> {
        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => {
                let records: Vec<_> = lookup.iter().collect();

                // RFC 7505 null MX: a "." exchange means the domain takes no mail.
                if records.iter().any(|mx| mx.exchange().is_root()) {
                    debug!("{domain} publishes a null MX");
                    return Ok(Vec::new());
                }

                if records.is_empty() {
                    return self.implicit_mx(domain).await;
                }

                let exchangers: Vec<_> = records
                    .iter()
                    .map(|mx| Exchanger::new(mx.exchange().to_utf8(), mx.preference()))
                    .collect();

                debug!("Resolved {} MX record(s) for {domain}", exchangers.len());
                Ok(exchangers)
            }
            Err(err) if err.is_nx_domain() => Ok(Vec::new()),
            Err(err) if err.is_no_records_found() => self.implicit_mx(domain).await,
            Err(source) => {
                warn!("MX lookup failed for {domain}: {source}");
                Err(ResolveError::LookupFailed {
                    domain: domain.to_string(),
                    source,
                })
            }
        }
    }
}

/// Caches positive answers and definitive misses. Transient failures are
/// never cached.
pub struct CachedResolver<R> {
    inner: R,
    cache: Arc<CacheLayer>,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl<R: MxResolver> CachedResolver<R> {
    #[must_use]
    pub const fn new(
        inner: R,
        cache: Arc<CacheLayer>,
        positive_ttl: Duration,
        negative_ttl: Duration,
    ) -> Self {
        Self {
            inner,
            cache,
            positive_ttl,
            negative_ttl,
        }
    }

    fn key(domain: &str) -> String {
        let domain = domain.trim().trim_end_matches('.');
        format!("mx:{}", domain.to_ascii_lowercase())
    }
}

#[async_trait]
impl<R: MxResolver> MxResolver for CachedResolver<R> {
    async fn resolve(&self, domain: &str) -> Result<Vec<Exchanger>, ResolveError> {
        let key = Self::key(domain);

        match self.cache.get::<Vec<Exchanger>>(&key).await {
            Ok(Some(exchangers)) => {
                debug!("MX cache hit for {domain}, {} exchanger(s)", exchangers.len());
                return Ok(exchangers);
            }
            Ok(None) => {}
            Err(err) => warn!("Ignoring unreadable MX cache entry for {domain}: {err}"),
        }

        let exchangers = self.inner.resolve(domain).await?;
        let ttl = if exchangers.is_empty() {
            self.negative_ttl
        } else {
            self.positive_ttl
        };

        if let Err(err) = self.cache.set(&key, &exchangers, ttl).await {
            warn!("Unable to cache MX result for {domain}: {err}");
        }

        Ok(exchangers)
    }
}
