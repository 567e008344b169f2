//! Host/port parsing for transfer targets

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    /// `host:port`, bracketing IPv6 literals.
    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr())
    }
}

/// Port as typed by a user: an integer in 1..=65535.
pub fn parse_port(raw: &str) -> Result<u16, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("port is required".to_string());
    }
    match trimmed.parse::<u32>() {
        Ok(p) if (1..=65535).contains(&p) => Ok(p as u16),
        Ok(p) => Err(format!("port {p} is outside 1-65535")),
        Err(_) => Err(format!("port {trimmed:?} is not a number")),
    }
}

/// Non-empty host with no whitespace.
pub fn validate_host(raw: &str) -> Result<String, String> {
    let host = raw.trim();
    if host.is_empty() {
        return Err("host is required".to_string());
    }
    if host.chars().any(char::is_whitespace) {
        return Err(format!("host {host:?} contains whitespace"));
    }
    Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
}

/// Parse `[gz://]host[:port]`; the port falls back to `default_port`.
pub fn parse_target(raw: &str, default_port: u16) -> Option<Target> {
    let s = raw.trim();
    let rest = match s.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("gz") => rest,
        Some(_) => return None,
        None => s,
    };
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return None;
    }

    // [v6]:port
    if let Some(inner) = rest.strip_prefix('[') {
        let (host, after) = inner.split_once(']')?;
        let port = match after.strip_prefix(':') {
            Some(p) => parse_port(p).ok()?,
            None if after.is_empty() => default_port,
            None => return None,
        };
        return Some(Target {
            host: host.to_string(),
            port,
        });
    }

    match rest.rsplit_once(':') {
        // bare v6 literal without brackets
        Some((h, _)) if h.contains(':') => Some(Target {
            host: rest.to_string(),
            port: default_port,
        }),
        Some((h, p)) if !h.is_empty() => Some(Target {
            host: h.to_string(),
            port: parse_port(p).ok()?,
        }),
        Some(_) => None,
        None => Some(Target {
            host: rest.to_string(),
            port: default_port,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_in_range() {
        assert_eq!(parse_port("5000"), Ok(5000));
        assert_eq!(parse_port(" 1 "), Ok(1));
        assert_eq!(parse_port("65535"), Ok(65535));
        assert!(parse_port("0").is_err());
        assert!(parse_port("65536").is_err());
        assert!(parse_port("-1").is_err());
        assert!(parse_port("http").is_err());
        assert!(parse_port("").is_err());
    }

    #[test]
    fn hosts() {
        assert_eq!(validate_host(" example.org ").unwrap(), "example.org");
        assert_eq!(validate_host("[::1]").unwrap(), "::1");
        assert!(validate_host("").is_err());
        assert!(validate_host("a b").is_err());
    }

    #[test]
    fn targets() {
        assert_eq!(
            parse_target("gz://10.0.0.2:7000/", 5000),
            Some(Target { host: "10.0.0.2".into(), port: 7000 })
        );
        assert_eq!(
            parse_target("localhost", 5000),
            Some(Target { host: "localhost".into(), port: 5000 })
        );
        assert_eq!(
            parse_target("[::1]:9000", 5000),
            Some(Target { host: "::1".into(), port: 9000 })
        );
        assert_eq!(parse_target("::1", 5000).map(|t| t.port), Some(5000));
        assert_eq!(parse_target("http://x:1", 5000), None);
        assert_eq!(parse_target("host:0", 5000), None);
        assert_eq!(parse_target(":80", 5000), None);
    }

    #[test]
    fn v6_addr_is_bracketed() {
        let t = Target { host: "::1".into(), port: 5050 };
        assert_eq!(t.addr(), "[::1]:5050");
        let t = Target { host: "127.0.0.1".into(), port: 5050 };
        assert_eq!(t.to_string(), "127.0.0.1:5050");
    }
}
