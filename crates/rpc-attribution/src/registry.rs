use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

/// dYdX mainnet RPC providers the trading front-end is known to route through.
pub const DYDX_MAINNET_PROVIDERS: [(&str, &str); 4] = [
    ("dydx-ops-rpc.kingnodes.com", "kingnodes"),
    ("dydx-mainnet-full-rpc.public.blastapi.io", "blastapi"),
    ("dydx-dao-rpc.polkachu.com", "polkachu"),
    ("dydx-dao-rpc.enigma-validator.com", "enigma"),
];

/// One configured endpoint: the host serving JSON-RPC and the provider operating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub host: String,
    pub name: String,
}

impl ProviderEndpoint {
    pub fn new(host: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            name: name.into(),
        }
    }
}

/// Ordered, immutable mapping of endpoint host to provider name.
///
/// Iteration follows configuration order, which is also the order used for
/// request matching and for the attribution scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRegistry {
    endpoints: IndexMap<String, String>,
}

impl ProviderRegistry {
    pub fn new<I>(endpoints: I) -> Result<Self>
    where
        I: IntoIterator<Item = ProviderEndpoint>,
    {
        let mut map = IndexMap::new();

        for ProviderEndpoint { host, name } in endpoints {
            let host = host.trim().to_ascii_lowercase();
            let name = name.trim().to_string();

            if host.is_empty() || name.is_empty() {
                return Err(Error::Config(
                    "provider host and name must be non-empty".to_string(),
                ));
            }
            if host.contains("://") || host.contains('/') {
                return Err(Error::Config(format!(
                    "provider host '{host}' must be a bare host without scheme or path"
                )));
            }
            if map.values().any(|existing| existing == &name) {
                return Err(Error::Config(format!("duplicate provider name '{name}'")));
            }
            if map.insert(host.clone(), name).is_some() {
                return Err(Error::Config(format!("duplicate provider host '{host}'")));
            }
        }

        if map.is_empty() {
            return Err(Error::Config(
                "provider registry must contain at least one endpoint".to_string(),
            ));
        }

        Ok(Self { endpoints: map })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// `(host, name)` pairs in registry order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.endpoints
            .iter()
            .map(|(host, name)| (host.as_str(), name.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.values().map(String::as_str)
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.endpoints
            .get_index(index)
            .map(|(_, name)| name.as_str())
    }

    /// Index of the first registered endpoint whose host matches the request URL.
    ///
    /// Matching compares the parsed URL host (optionally with its port) against
    /// the registered host exactly, so `rpc.example` never claims traffic for
    /// `rpc.example.evil` or `new-rpc.example`. Unparseable URLs match nothing.
    pub fn match_request(&self, request_url: &str) -> Option<usize> {
        let url = Url::parse(request_url).ok()?;
        let host = url.host_str()?;
        let authority = url.port().map(|port| format!("{host}:{port}"));

        self.endpoints.keys().position(|registered| {
            registered.eq_ignore_ascii_case(host)
                || authority
                    .as_deref()
                    .is_some_and(|authority| registered.eq_ignore_ascii_case(authority))
        })
    }
}
