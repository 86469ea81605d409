//! Image URL validation (SSRF prevention)
//!
//! Every media URL is validated before any outbound request: scheme must be
//! http/https, a hostname must be present, the hostname must not resolve to
//! a private/loopback/link-local/reserved address, and when an allow-list is
//! configured the hostname must be on it. Resolution failure is treated as
//! unsafe.

use std::net::IpAddr;

use thiserror::Error;
use url::Url;

use crate::core::config::SsrfConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlGuardError {
    #[error("URL is empty")]
    Empty,

    #[error("Invalid URL: {0}")]
    Invalid(String),

    #[error("Invalid scheme '{0}' — only http/https allowed")]
    Scheme(String),

    #[error("URL has no hostname")]
    NoHost,

    #[error("Hostname '{0}' resolves to a private/reserved address")]
    PrivateAddress(String),

    #[error("Hostname '{0}' is not in the allowed domains list")]
    NotAllowed(String),
}

/// Validate that `raw` is safe to fetch under `config`.
pub async fn validate_image_url(raw: &str, config: &SsrfConfig) -> Result<(), UrlGuardError> {
    if raw.trim().is_empty() {
        return Err(UrlGuardError::Empty);
    }

    let parsed = Url::parse(raw).map_err(|e| UrlGuardError::Invalid(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(UrlGuardError::Scheme(other.to_string())),
    }

    let host = parsed.host_str().ok_or(UrlGuardError::NoHost)?.to_lowercase();

    if config.check_enabled && resolves_to_forbidden(&host).await {
        return Err(UrlGuardError::PrivateAddress(host));
    }

    if !config.allowed_domains.is_empty() && !config.allowed_domains.contains(&host) {
        return Err(UrlGuardError::NotAllowed(host));
    }

    Ok(())
}

/// True when the hostname cannot be resolved or any resolved address is
/// private/loopback/link-local/reserved.
async fn resolves_to_forbidden(host: &str) -> bool {
    // IP literals short-circuit resolution
    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        return is_forbidden_ip(ip);
    }

    match tokio::net::lookup_host((host, 80)).await {
        Ok(addrs) => {
            let mut any = false;
            for addr in addrs {
                any = true;
                if is_forbidden_ip(addr.ip()) {
                    return true;
                }
            }
            // No addresses at all: treat as unsafe
            !any
        }
        Err(_) => true,
    }
}

fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                // "This network" 0.0.0.0/8
                || octets[0] == 0
                // Carrier-grade NAT 100.64.0.0/10
                || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
                // IETF protocol assignments 192.0.0.0/24
                || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
                // Benchmarking 198.18.0.0/15
                || (octets[0] == 198 && (octets[1] == 18 || octets[1] == 19))
                // Reserved 240.0.0.0/4 and multicast 224.0.0.0/4
                || octets[0] >= 224
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_forbidden_ip(IpAddr::V4(mapped));
            }
            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                // Unique local fc00::/7
                || (segments[0] & 0xfe00) == 0xfc00
                // Link local fe80::/10
                || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_config() -> SsrfConfig {
        SsrfConfig {
            allowed_domains: Vec::new(),
            check_enabled: true,
        }
    }

    #[tokio::test]
    async fn test_rejects_empty() {
        assert_eq!(
            validate_image_url("  ", &open_config()).await,
            Err(UrlGuardError::Empty)
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_scheme() {
        let err = validate_image_url("ftp://example.com/a.jpg", &open_config())
            .await
            .unwrap_err();
        assert_eq!(err, UrlGuardError::Scheme("ftp".to_string()));

        let err = validate_image_url("file:///etc/passwd", &open_config())
            .await
            .unwrap_err();
        assert_eq!(err, UrlGuardError::Scheme("file".to_string()));
    }

    #[tokio::test]
    async fn test_rejects_loopback_literal() {
        let err = validate_image_url("http://127.0.0.1/a.jpg", &open_config())
            .await
            .unwrap_err();
        assert!(matches!(err, UrlGuardError::PrivateAddress(_)));
    }

    #[tokio::test]
    async fn test_rejects_metadata_endpoint() {
        let err = validate_image_url(
            "http://169.254.169.254/latest/meta-data/",
            &open_config(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UrlGuardError::PrivateAddress(_)));
    }

    #[tokio::test]
    async fn test_rejects_private_ranges() {
        for url in [
            "http://10.0.0.8/a.jpg",
            "http://172.16.4.2/a.jpg",
            "http://192.168.1.1/a.jpg",
            "http://100.64.0.1/a.jpg",
            "http://[::1]/a.jpg",
            "http://[fd00::1]/a.jpg",
        ] {
            let err = validate_image_url(url, &open_config()).await.unwrap_err();
            assert!(matches!(err, UrlGuardError::PrivateAddress(_)), "{url}");
        }
    }

    #[tokio::test]
    async fn test_allow_list_rejects_unknown_host() {
        let config = SsrfConfig {
            allowed_domains: vec!["res.cloudinary.com".to_string()],
            check_enabled: false,
        };
        let err = validate_image_url("https://evil.example.com/a.jpg", &config)
            .await
            .unwrap_err();
        assert_eq!(err, UrlGuardError::NotAllowed("evil.example.com".to_string()));
    }

    #[tokio::test]
    async fn test_allow_list_accepts_listed_host() {
        let config = SsrfConfig {
            allowed_domains: vec!["res.cloudinary.com".to_string()],
            check_enabled: false,
        };
        assert!(
            validate_image_url("https://res.cloudinary.com/x/a.jpg", &config)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_checks_disabled_skips_resolution() {
        let config = SsrfConfig {
            allowed_domains: Vec::new(),
            check_enabled: false,
        };
        assert!(
            validate_image_url("http://192.168.0.5/a.jpg", &config)
                .await
                .is_ok()
        );
    }

    #[test]
    fn test_forbidden_ip_table() {
        for ip in [
            "127.0.0.1",
            "10.1.2.3",
            "192.168.0.1",
            "169.254.169.254",
            "0.0.0.0",
            "0.1.2.3",
            "192.0.0.8",
            "198.18.0.1",
            "198.19.255.254",
            "255.255.255.255",
            "224.0.0.1",
            "240.0.0.1",
        ] {
            assert!(is_forbidden_ip(ip.parse().unwrap()), "{ip}");
        }
        for ip in ["1.1.1.1", "8.8.8.8", "151.101.1.140", "198.17.0.1", "198.20.0.1", "192.0.1.1"] {
            assert!(!is_forbidden_ip(ip.parse().unwrap()), "{ip}");
        }
    }
}
