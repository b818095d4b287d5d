use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::sync::Arc;

use crate::error::AddressError;

/// A network address reduced to its raw bytes.
///
/// Allow-list membership is decided by comparing these bytes, so the two
/// variants never compare equal to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParsedAddress {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl ParsedAddress {
    pub fn octets(&self) -> &[u8] {
        match self {
            ParsedAddress::V4(b) => b,
            ParsedAddress::V6(b) => b,
        }
    }
}

impl From<IpAddr> for ParsedAddress {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => ParsedAddress::V4(v4.octets()),
            // Dual-stack listeners report IPv4 peers as ::ffff:a.b.c.d
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => ParsedAddress::V4(v4.octets()),
                None => ParsedAddress::V6(v6.octets()),
            },
        }
    }
}

impl fmt::Display for ParsedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParsedAddress::V4(b) => Ipv4Addr::from(b).fmt(f),
            ParsedAddress::V6(b) => Ipv6Addr::from(b).fmt(f),
        }
    }
}

/// Name resolution capability used for host names in the allow-list and,
/// when live lookups are enabled, for sender domains.
///
/// Implementations may block; async callers go through [`lookup_address`].
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolves through the operating system's resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        Ok((host, 0).to_socket_addrs()?.map(|a| a.ip()).collect())
    }
}

/// Parse an IPv6 literal, an IPv4 literal or a host name, in that order.
///
/// IPv6 literals must spell out all eight groups; `::` compression is not
/// understood.
pub fn parse_address(text: &str, resolver: &dyn Resolver) -> Result<ParsedAddress, AddressError> {
    if text.contains(':') {
        parse_v6(text)
    } else if text.ends_with(|c: char| c.is_ascii_digit()) {
        parse_v4(text)
    } else if text.is_empty() {
        Err(AddressError::InvalidAddress(String::new()))
    } else {
        resolve_host(text, resolver)
    }
}

/// [`parse_address`] run on the blocking pool, for use inside sessions.
pub async fn lookup_address(
    text: String,
    resolver: Arc<dyn Resolver>,
) -> Result<ParsedAddress, AddressError> {
    let host = text.clone();
    tokio::task::spawn_blocking(move || parse_address(&text, resolver.as_ref()))
        .await
        .unwrap_or(Err(AddressError::UnresolvedHost(host)))
}

fn parse_v6(text: &str) -> Result<ParsedAddress, AddressError> {
    let invalid = || AddressError::InvalidAddress(text.to_owned());
    let mut octets = [0u8; 16];
    let mut count = 0;

    for token in text.split(':') {
        if count == 8 || token.is_empty() || token.len() > 4 {
            return Err(invalid());
        }
        if !token.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let group = u16::from_str_radix(token, 16).map_err(|_| invalid())?;
        octets[count * 2..count * 2 + 2].copy_from_slice(&group.to_be_bytes());
        count += 1;
    }

    if count != 8 {
        return Err(invalid());
    }
    Ok(ParsedAddress::V6(octets))
}

fn parse_v4(text: &str) -> Result<ParsedAddress, AddressError> {
    let invalid = || AddressError::InvalidAddress(text.to_owned());
    let mut octets = [0u8; 4];
    let mut count = 0;

    for token in text.split('.') {
        if count == 4 || token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        octets[count] = token.parse::<u8>().map_err(|_| invalid())?;
        count += 1;
    }

    if count != 4 {
        return Err(invalid());
    }
    Ok(ParsedAddress::V4(octets))
}

fn resolve_host(host: &str, resolver: &dyn Resolver) -> Result<ParsedAddress, AddressError> {
    resolver
        .resolve(host)
        .ok()
        .and_then(|addrs| addrs.into_iter().next())
        .map(ParsedAddress::from)
        .ok_or_else(|| AddressError::UnresolvedHost(host.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedResolver(HashMap<&'static str, Vec<IpAddr>>);

    impl Resolver for FixedResolver {
        fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            Ok(self.0.get(host).cloned().unwrap_or_default())
        }
    }

    fn resolver() -> FixedResolver {
        let mut names = HashMap::new();
        names.insert("mx.example.com", vec!["192.0.2.7".parse().unwrap()]);
        names.insert("empty.example.com", vec![]);
        FixedResolver(names)
    }

    fn parse(text: &str) -> Result<ParsedAddress, AddressError> {
        parse_address(text, &resolver())
    }

    #[test]
    fn test_ipv4_literal() {
        assert_eq!(parse("127.0.0.1"), Ok(ParsedAddress::V4([127, 0, 0, 1])));
        assert_eq!(parse("0.0.0.0"), Ok(ParsedAddress::V4([0, 0, 0, 0])));
        assert_eq!(
            parse("255.255.255.255"),
            Ok(ParsedAddress::V4([255, 255, 255, 255]))
        );
        assert_eq!(parse("10.020.3.4"), Ok(ParsedAddress::V4([10, 20, 3, 4])));
    }

    #[test]
    fn test_ipv4_every_octet_value() {
        for value in 0..=255u8 {
            let text = format!("{value}.1.{value}.2");
            assert_eq!(parse(&text), Ok(ParsedAddress::V4([value, 1, value, 2])));
        }
    }

    #[test]
    fn test_ipv4_invalid() {
        for bad in [
            "256.0.0.1",
            "1.2.3",
            "1.2.3.4.5",
            "1..3.4",
            "-1.2.3.4",
            "+1.2.3.4",
            "a.2.3.4",
            "1.2.3.1000",
        ] {
            assert!(
                matches!(parse(bad), Err(AddressError::InvalidAddress(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_ipv6_literal() {
        let mut loopback = [0u8; 16];
        loopback[15] = 1;
        assert_eq!(parse("0:0:0:0:0:0:0:1"), Ok(ParsedAddress::V6(loopback)));

        assert_eq!(
            parse("2001:DB8:0:0:8:800:200C:417A"),
            Ok(ParsedAddress::V6([
                0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0x08, 0x08, 0, 0x20, 0x0c, 0x41, 0x7a
            ]))
        );
    }

    #[test]
    fn test_ipv6_wrong_group_count() {
        for bad in [
            "0:0:0:0:0:0:1",
            "0:0:0:0:0:0:0:0:1",
            "::1",
            "fe80::1",
            "1:2:3:4:5:6:7:",
            "1:2:3:4:5:6:7:12345",
            "1:2:3:4:5:6:7:g",
        ] {
            assert!(
                matches!(parse(bad), Err(AddressError::InvalidAddress(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_host_names() {
        assert_eq!(parse("mx.example.com"), Ok(ParsedAddress::V4([192, 0, 2, 7])));
        assert_eq!(
            parse("empty.example.com"),
            Err(AddressError::UnresolvedHost("empty.example.com".to_owned()))
        );
        assert_eq!(
            parse("nowhere.invalid"),
            Err(AddressError::UnresolvedHost("nowhere.invalid".to_owned()))
        );
        assert!(matches!(parse(""), Err(AddressError::InvalidAddress(_))));
    }

    #[test]
    fn test_from_ip_addr() {
        let v4: IpAddr = "192.168.1.20".parse().unwrap();
        assert_eq!(ParsedAddress::from(v4), ParsedAddress::V4([192, 168, 1, 20]));

        let mapped: IpAddr = "::ffff:127.0.0.1".parse().unwrap();
        assert_eq!(ParsedAddress::from(mapped), ParsedAddress::V4([127, 0, 0, 1]));

        let v6: IpAddr = "::1".parse().unwrap();
        assert_eq!(ParsedAddress::from(v6), parse("0:0:0:0:0:0:0:1").unwrap());
    }

    #[test]
    fn test_display() {
        assert_eq!(parse("10.0.0.1").unwrap().to_string(), "10.0.0.1");
        assert_eq!(parse("0:0:0:0:0:0:0:1").unwrap().to_string(), "::1");
    }

    #[tokio::test]
    async fn test_lookup_address() {
        let resolver: Arc<dyn Resolver> = Arc::new(resolver());
        assert_eq!(
            lookup_address("mx.example.com".to_owned(), resolver.clone()).await,
            Ok(ParsedAddress::V4([192, 0, 2, 7]))
        );
        assert!(lookup_address("nowhere.invalid".to_owned(), resolver)
            .await
            .is_err());
    }
}
