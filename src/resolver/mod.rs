/*!
 * Channel name resolution
 *
 * Domain-style channel addresses are mapped to channel identifiers through a
 * text record published for the domain under a well-known key. `.eth` names
 * are read from ENS, other domains from DNS TXT. Lookups are not retried
 * here; a failure aborts startup of that one channel.
 */

pub mod ens;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig as DnsConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use tracing::debug;

use crate::config::ResolverConfig;
use crate::error::ResolutionError;

pub use ens::{EnsResolver, EthCall, JsonRpcClient};

/// Maps `(domain, record key)` to a channel identifier
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, domain: &str, record_key: &str) -> Result<String, ResolutionError>;
}

/// Table of known records, optionally deferring misses to another resolver
#[derive(Clone, Default)]
pub struct StaticResolver {
    records: BTreeMap<String, String>,
    fallback: Option<Arc<dyn NameResolver>>,
}

impl StaticResolver {
    pub fn new(records: BTreeMap<String, String>) -> Self {
        Self {
            records,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn NameResolver>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn resolve(&self, domain: &str, record_key: &str) -> Result<String, ResolutionError> {
        if let Some(value) = self.records.get(domain) {
            return validate_value(domain, record_key, value);
        }
        match &self.fallback {
            Some(fallback) => fallback.resolve(domain, record_key).await,
            None => Err(ResolutionError::NotFound {
                domain: domain.to_string(),
                key: record_key.to_string(),
            }),
        }
    }
}

/// DNS TXT lookups; records of the form `key=value`
pub struct DnsTxtResolver {
    resolver: TokioResolver,
}

impl DnsTxtResolver {
    pub fn new() -> Self {
        Self::with_config(DnsConfig::default())
    }

    pub fn with_config(config: DnsConfig) -> Self {
        let resolver =
            TokioResolver::builder_with_config(config, TokioConnectionProvider::default()).build();
        Self { resolver }
    }
}

impl Default for DnsTxtResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NameResolver for DnsTxtResolver {
    async fn resolve(&self, domain: &str, record_key: &str) -> Result<String, ResolutionError> {
        let lookup = self
            .resolver
            .txt_lookup(domain)
            .await
            .map_err(|e| ResolutionError::Lookup {
                domain: domain.to_string(),
                reason: e.to_string(),
            })?;

        let records: Vec<String> = lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect::<String>()
            })
            .collect();
        debug!(domain, count = records.len(), "fetched TXT records");

        find_record(domain, record_key, records)
    }
}

/// Sends `.eth` names to ENS and every other domain to DNS
#[derive(Clone, Default)]
pub struct NameRouter {
    ens: Option<Arc<dyn NameResolver>>,
    dns: Option<Arc<dyn NameResolver>>,
}

impl NameRouter {
    pub fn new(ens: Option<Arc<dyn NameResolver>>, dns: Option<Arc<dyn NameResolver>>) -> Self {
        Self { ens, dns }
    }
}

fn is_ens_name(domain: &str) -> bool {
    domain
        .rsplit('.')
        .next()
        .is_some_and(|tld| tld.eq_ignore_ascii_case("eth"))
}

#[async_trait]
impl NameResolver for NameRouter {
    async fn resolve(&self, domain: &str, record_key: &str) -> Result<String, ResolutionError> {
        let backend = if is_ens_name(domain) { &self.ens } else { &self.dns };
        match backend {
            Some(backend) => backend.resolve(domain, record_key).await,
            None => Err(ResolutionError::NotFound {
                domain: domain.to_string(),
                key: record_key.to_string(),
            }),
        }
    }
}

/// Build the resolver chain described by configuration: static table first,
/// then ENS or DNS by top-level domain, each when enabled.
pub fn resolver_from_config(config: &ResolverConfig) -> Arc<dyn NameResolver> {
    let table = StaticResolver::new(config.records.clone());
    if !config.ens && !config.dns {
        return Arc::new(table);
    }

    let ens = config
        .ens
        .then(|| Arc::new(EnsResolver::new(config.ens_rpc_url.clone())) as Arc<dyn NameResolver>);
    let dns = config
        .dns
        .then(|| Arc::new(DnsTxtResolver::new()) as Arc<dyn NameResolver>);
    Arc::new(table.with_fallback(Arc::new(NameRouter::new(ens, dns))))
}

/// Pick `record_key`'s value out of `key=value` text records
pub fn find_record(
    domain: &str,
    record_key: &str,
    records: impl IntoIterator<Item = String>,
) -> Result<String, ResolutionError> {
    for record in records {
        if let Some((key, value)) = record.split_once('=') {
            if key.trim() == record_key {
                return validate_value(domain, record_key, value);
            }
        }
    }
    Err(ResolutionError::NotFound {
        domain: domain.to_string(),
        key: record_key.to_string(),
    })
}

fn validate_value(domain: &str, record_key: &str, value: &str) -> Result<String, ResolutionError> {
    let value = value.trim();
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(ResolutionError::Malformed {
            domain: domain.to_string(),
            key: record_key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "subplebbit-address";

    #[test]
    fn test_find_record() {
        let records = vec![
            "v=spf1 -all".to_string(),
            "subplebbit-address=12D3KooWPlebToken".to_string(),
        ];
        assert_eq!(
            find_record("plebtoken.eth", KEY, records).unwrap(),
            "12D3KooWPlebToken"
        );
    }

    #[test]
    fn test_find_record_missing() {
        let records = vec!["other=1".to_string()];
        assert!(matches!(
            find_record("plebtoken.eth", KEY, records),
            Err(ResolutionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_find_record_malformed() {
        let records = vec!["subplebbit-address= ".to_string()];
        assert!(matches!(
            find_record("plebtoken.eth", KEY, records),
            Err(ResolutionError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let mut records = BTreeMap::new();
        records.insert("plebtoken.eth".to_string(), "12D3KooWPlebToken".to_string());
        let resolver = StaticResolver::new(records);

        assert_eq!(
            resolver.resolve("plebtoken.eth", KEY).await.unwrap(),
            "12D3KooWPlebToken"
        );
        assert!(matches!(
            resolver.resolve("pleblore.eth", KEY).await,
            Err(ResolutionError::NotFound { .. })
        ));
    }

    fn table(domain: &str, value: &str) -> Arc<dyn NameResolver> {
        let mut records = BTreeMap::new();
        records.insert(domain.to_string(), value.to_string());
        Arc::new(StaticResolver::new(records))
    }

    #[tokio::test]
    async fn test_router_sends_eth_names_to_ens() {
        let router = NameRouter::new(
            Some(table("plebtoken.eth", "12D3KooWFromEns")),
            Some(table("plebtoken.eth", "12D3KooWFromDns")),
        );
        assert_eq!(
            router.resolve("plebtoken.eth", KEY).await.unwrap(),
            "12D3KooWFromEns"
        );
    }

    #[tokio::test]
    async fn test_router_sends_other_domains_to_dns() {
        let router = NameRouter::new(
            Some(table("plebbit.com", "12D3KooWFromEns")),
            Some(table("plebbit.com", "12D3KooWFromDns")),
        );
        assert_eq!(
            router.resolve("plebbit.com", KEY).await.unwrap(),
            "12D3KooWFromDns"
        );
    }

    #[tokio::test]
    async fn test_router_without_backend_not_found() {
        let router = NameRouter::new(None, Some(table("plebtoken.eth", "12D3KooWFromDns")));
        assert!(matches!(
            router.resolve("plebtoken.eth", KEY).await,
            Err(ResolutionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_ens_name_detection() {
        assert!(is_ens_name("plebtoken.eth"));
        assert!(is_ens_name("Pleb.ETH"));
        assert!(!is_ens_name("plebbit.com"));
        assert!(!is_ens_name("ethereum.org"));
    }

    #[tokio::test]
    async fn test_static_resolver_fallback() {
        let mut inner = BTreeMap::new();
        inner.insert("pleblore.eth".to_string(), "12D3KooWLore".to_string());
        let resolver = StaticResolver::default()
            .with_fallback(Arc::new(StaticResolver::new(inner)));

        assert_eq!(
            resolver.resolve("pleblore.eth", KEY).await.unwrap(),
            "12D3KooWLore"
        );
    }
}
