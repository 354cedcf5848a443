//! Authority parsing
//!
//! `Get`/`GetProfile` paths take the form
//! `[<hostname>.]<service>.<namespace>.svc.<cluster-domain>[:<port>]`
//! or a bare IPv4/IPv6 address with an optional port. A missing port
//! defaults to 80.

use std::net::IpAddr;

use crate::core::constants::DEFAULT_AUTHORITY_PORT;
use crate::discovery::address::ServiceKey;
use crate::discovery::error::DiscoveryError;

/// A parsed destination authority.
#[derive(Debug, Clone, PartialEq)]
pub enum Authority {
    Service { key: ServiceKey },
    Ip { ip: IpAddr, port: u16 },
}

/// Parse an authority path against the configured cluster domain.
pub fn parse_authority(path: &str, cluster_domain: &str) -> Result<Authority, DiscoveryError> {
    let (host, port) = split_host_port(path)?;

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(Authority::Ip { ip, port });
    }

    let labels: Vec<&str> = host.split('.').collect();
    let domain_labels: Vec<&str> = cluster_domain.split('.').collect();

    // The host must end with `svc.<cluster-domain>`.
    let suffix_len = domain_labels.len() + 1;
    if labels.len() < suffix_len + 2 {
        return Err(DiscoveryError::InvalidAuthority(path.to_string()));
    }
    let (head, suffix) = labels.split_at(labels.len() - suffix_len);
    if suffix[0] != "svc" || suffix[1..] != domain_labels[..] {
        return Err(DiscoveryError::InvalidAuthority(path.to_string()));
    }
    if head.iter().any(|label| !valid_label(label)) {
        return Err(DiscoveryError::InvalidAuthority(path.to_string()));
    }

    let key = match head {
        [service, namespace] => ServiceKey::new(*namespace, *service, port),
        [hostname, service, namespace] => {
            ServiceKey::new(*namespace, *service, port).with_hostname(*hostname)
        }
        _ => return Err(DiscoveryError::InvalidAuthority(path.to_string())),
    };
    Ok(Authority::Service { key })
}

fn split_host_port(path: &str) -> Result<(&str, u16), DiscoveryError> {
    if path.is_empty() {
        return Err(DiscoveryError::InvalidAuthority(path.to_string()));
    }

    // Bracketed IPv6 literal, e.g. `[2001:db8::1]:443`.
    if let Some(rest) = path.strip_prefix('[') {
        let Some((host, tail)) = rest.split_once(']') else {
            return Err(DiscoveryError::InvalidAuthority(path.to_string()));
        };
        let port = match tail {
            "" => DEFAULT_AUTHORITY_PORT,
            _ => parse_port(tail.strip_prefix(':').ok_or_else(|| {
                DiscoveryError::InvalidAuthority(path.to_string())
            })?)
            .ok_or_else(|| DiscoveryError::InvalidAuthority(path.to_string()))?,
        };
        return Ok((host, port));
    }

    // More than one colon means an unbracketed IPv6 literal.
    if path.matches(':').count() > 1 {
        return Ok((path, DEFAULT_AUTHORITY_PORT));
    }

    match path.split_once(':') {
        None => Ok((path, DEFAULT_AUTHORITY_PORT)),
        Some((host, port)) => {
            let port = parse_port(port)
                .ok_or_else(|| DiscoveryError::InvalidAuthority(path.to_string()))?;
            Ok((host, port))
        }
    }
}

fn parse_port(raw: &str) -> Option<u16> {
    let port: u16 = raw.parse().ok()?;
    (port != 0).then_some(port)
}

fn valid_label(label: &str) -> bool {
    !label.is_empty()
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "cluster.local";

    #[test]
    fn test_service_authority() {
        let authority = parse_authority("web.emojivoto.svc.cluster.local:8080", DOMAIN).unwrap();
        assert_eq!(
            authority,
            Authority::Service {
                key: ServiceKey::new("emojivoto", "web", 8080)
            }
        );
    }

    #[test]
    fn test_missing_port_defaults_to_80() {
        let authority = parse_authority("web.emojivoto.svc.cluster.local", DOMAIN).unwrap();
        match authority {
            Authority::Service { key } => assert_eq!(key.port, 80),
            other => panic!("unexpected authority: {other:?}"),
        }
    }

    #[test]
    fn test_hostname_authority() {
        let authority =
            parse_authority("web-0.web.emojivoto.svc.cluster.local:8080", DOMAIN).unwrap();
        match authority {
            Authority::Service { key } => {
                assert_eq!(key.hostname.as_deref(), Some("web-0"));
                assert_eq!(key.name, "web");
                assert_eq!(key.namespace, "emojivoto");
            }
            other => panic!("unexpected authority: {other:?}"),
        }
    }

    #[test]
    fn test_custom_cluster_domain() {
        let authority =
            parse_authority("web.emojivoto.svc.my.domain:8080", "my.domain").unwrap();
        assert!(matches!(authority, Authority::Service { .. }));
        assert!(parse_authority("web.emojivoto.svc.cluster.local:8080", "my.domain").is_err());
    }

    #[test]
    fn test_ipv4_authority() {
        let authority = parse_authority("10.0.0.1:8080", DOMAIN).unwrap();
        assert_eq!(
            authority,
            Authority::Ip {
                ip: "10.0.0.1".parse().unwrap(),
                port: 8080
            }
        );

        let authority = parse_authority("10.0.0.1", DOMAIN).unwrap();
        assert_eq!(
            authority,
            Authority::Ip {
                ip: "10.0.0.1".parse().unwrap(),
                port: 80
            }
        );
    }

    #[test]
    fn test_ipv6_authority() {
        let authority = parse_authority("[2001:db8::1]:443", DOMAIN).unwrap();
        assert_eq!(
            authority,
            Authority::Ip {
                ip: "2001:db8::1".parse().unwrap(),
                port: 443
            }
        );

        let authority = parse_authority("2001:db8::1", DOMAIN).unwrap();
        assert_eq!(
            authority,
            Authority::Ip {
                ip: "2001:db8::1".parse().unwrap(),
                port: 80
            }
        );
    }

    #[test]
    fn test_invalid_authorities() {
        for path in [
            "",
            "web",
            "web.emojivoto",
            "web.emojivoto.svc",
            "web.emojivoto.pod.cluster.local:8080",
            "a.b.web.emojivoto.svc.cluster.local:8080",
            "web.emojivoto.svc.cluster.local:0",
            "web.emojivoto.svc.cluster.local:http",
            "web.emojivoto.svc.cluster.local:99999",
            "-web.emojivoto.svc.cluster.local:8080",
            "web_1.emojivoto.svc.cluster.local:8080",
            "[2001:db8::1:443",
        ] {
            assert!(
                parse_authority(path, DOMAIN).is_err(),
                "expected {path:?} to be rejected"
            );
        }
    }
}
