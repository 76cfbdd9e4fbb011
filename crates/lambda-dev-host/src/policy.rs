//! Outbound HTTP policy for the `fetch` binding.
//!
//! The dev server lets bundles reach any host by default, like the platform
//! it emulates. A [`FetchPolicy`] narrows that down per project.

use std::collections::HashSet;

use lambda_dev_common::FetchConfig;

/// Outbound HTTP policy.
///
/// Host patterns can be:
/// - Exact match: `api.example.com`
/// - Wildcard subdomain: `*.example.com` (matches `api.example.com` and `example.com`)
/// - All hosts: `*`
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Allowed host patterns.
    pub allowed_hosts: HashSet<String>,

    /// Refuse loopback, private and link-local targets.
    pub block_private_addresses: bool,

    /// Maximum requests per artifact; unlimited when unset.
    pub max_requests: Option<u32>,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

impl FetchPolicy {
    /// Policy described by the `fetch` section of the dev config.
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            allowed_hosts: config.allowed_hosts.iter().cloned().collect(),
            block_private_addresses: config.block_private_addresses,
            max_requests: config.max_requests,
        }
    }

    /// A policy refusing every request.
    pub fn deny_all() -> Self {
        Self {
            allowed_hosts: HashSet::new(),
            block_private_addresses: true,
            max_requests: Some(0),
        }
    }

    /// Create a builder for constructing a policy.
    pub fn builder() -> FetchPolicyBuilder {
        FetchPolicyBuilder::default()
    }

    /// Check if the host of `url` matches an allowed pattern.
    pub fn is_host_allowed(&self, url: &str) -> bool {
        if self.allowed_hosts.contains("*") {
            return url::Url::parse(url).is_ok();
        }

        let host = match url::Url::parse(url) {
            Ok(parsed) => match parsed.host_str() {
                Some(h) => h.to_lowercase(),
                None => return false,
            },
            Err(_) => return false,
        };

        self.allowed_hosts
            .iter()
            .any(|pattern| Self::matches_pattern(pattern, &host))
    }

    /// Check whether `url` may be requested at all.
    pub fn permits(&self, url: &str) -> bool {
        self.is_host_allowed(url)
            && !(self.block_private_addresses && Self::is_private_address(url))
    }

    fn matches_pattern(pattern: &str, host: &str) -> bool {
        let pattern = pattern.to_lowercase();

        if let Some(domain) = pattern.strip_prefix("*.") {
            host == domain || host.ends_with(&format!(".{domain}"))
        } else {
            pattern == host
        }
    }

    /// Check if the host of `url` is a loopback, private or link-local
    /// address, or a cloud metadata endpoint.
    pub fn is_private_address(url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };

        let Some(host_str) = parsed.host_str() else {
            return false;
        };
        let host = host_str.to_lowercase();

        if host == "localhost" || host == "metadata.google.internal" {
            return true;
        }

        match parsed.host() {
            Some(url::Host::Ipv4(v4)) => {
                v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_broadcast()
                    || v4.is_unspecified()
            }
            Some(url::Host::Ipv6(v6)) => v6.is_loopback() || v6.is_unspecified(),
            _ => false,
        }
    }
}

/// Builder for [`FetchPolicy`].
#[derive(Debug, Default)]
pub struct FetchPolicyBuilder {
    allowed_hosts: HashSet<String>,
    block_private_addresses: bool,
    max_requests: Option<u32>,
}

impl FetchPolicyBuilder {
    /// Allow requests to specific host patterns.
    #[must_use]
    pub fn allow_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_hosts.extend(hosts.into_iter().map(Into::into));
        self
    }

    /// Refuse private targets.
    #[must_use]
    pub fn block_private_addresses(mut self) -> Self {
        self.block_private_addresses = true;
        self
    }

    /// Cap the number of requests per artifact.
    #[must_use]
    pub fn max_requests(mut self, max: u32) -> Self {
        self.max_requests = Some(max);
        self
    }

    /// Build the policy.
    #[must_use]
    pub fn build(self) -> FetchPolicy {
        FetchPolicy {
            allowed_hosts: self.allowed_hosts,
            block_private_addresses: self.block_private_addresses,
            max_requests: self.max_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_everything() {
        let policy = FetchPolicy::default();
        assert!(policy.permits("https://api.example.com/path"));
        assert!(policy.permits("http://localhost:8080/"));
        assert!(!policy.permits("not a url"));
        assert_eq!(policy.max_requests, None);
    }

    #[test]
    fn test_deny_all() {
        let policy = FetchPolicy::deny_all();
        assert!(!policy.permits("https://api.example.com/"));
    }

    #[test]
    fn test_exact_match() {
        let policy = FetchPolicy::builder().allow_hosts(["api.example.com"]).build();

        assert!(policy.permits("https://api.example.com/path"));
        assert!(!policy.permits("https://other.example.com/path"));
    }

    #[test]
    fn test_wildcard_subdomain() {
        let policy = FetchPolicy::builder().allow_hosts(["*.example.com"]).build();

        assert!(policy.permits("https://api.example.com/path"));
        assert!(policy.permits("https://example.com/path"));
        assert!(!policy.permits("https://badexample.com/path"));
        assert!(!policy.permits("https://evil.com/path"));
    }

    #[test]
    fn test_private_addresses_blocked_when_requested() {
        let policy = FetchPolicy::builder()
            .allow_hosts(["*"])
            .block_private_addresses()
            .build();

        assert!(!policy.permits("http://localhost:8080/"));
        assert!(!policy.permits("http://127.0.0.1:8080/"));
        assert!(!policy.permits("http://[::1]:8080/"));
        assert!(!policy.permits("http://192.168.1.1/"));
        assert!(!policy.permits("http://169.254.169.254/"));
        assert!(policy.permits("https://8.8.8.8/"));
    }

    #[test]
    fn test_from_config() {
        let config = FetchConfig {
            allowed_hosts: vec!["api.example.com".into()],
            max_requests: Some(5),
            ..Default::default()
        };
        let policy = FetchPolicy::from_config(&config);

        assert!(policy.permits("https://api.example.com/"));
        assert!(!policy.permits("https://other.com/"));
        assert_eq!(policy.max_requests, Some(5));
        assert!(!policy.block_private_addresses);
    }
}
