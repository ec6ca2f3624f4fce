//! Hop descriptors
//!
//! A hop is one intermediate SSH host in the chain, written as
//! `username@host:port` on the command line and in config files.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors produced while parsing a hop descriptor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HopParseError {
    #[error("invalid format: '{input}' (expected user@host:port)")]
    InvalidFormat {
        input: String,
        #[source]
        source: Option<ParseIntError>,
    },
}

fn user_host_port_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9]+)@([^:]+):(\d+)$").expect("hop descriptor regex is valid")
    })
}

/// One hop in the chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HopSpec {
    username: String,
    host: String,
    port: u16,
}

impl HopSpec {
    pub fn new(username: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            username: username.into(),
            host: host.into(),
            port,
        }
    }

    /// Parse a `username@host:port` descriptor
    pub fn parse(s: &str) -> Result<Self, HopParseError> {
        let caps = user_host_port_regex()
            .captures(s)
            .ok_or_else(|| HopParseError::InvalidFormat {
                input: s.to_string(),
                source: None,
            })?;

        let port = caps[3]
            .parse::<u16>()
            .map_err(|e| HopParseError::InvalidFormat {
                input: s.to_string(),
                source: Some(e),
            })?;

        Ok(Self {
            username: caps[1].to_string(),
            host: caps[2].to_string(),
            port,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form used for dialing
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for HopSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

impl FromStr for HopSpec {
    type Err = HopParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for HopSpec {
    type Error = HopParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HopSpec> for String {
    fn from(hop: HopSpec) -> Self {
        hop.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_parse_hop() {
        let hop = HopSpec::parse("user@host.example.com:22").unwrap();
        assert_eq!(hop, HopSpec::new("user", "host.example.com", 22));
        assert_eq!(hop.username(), "user");
        assert_eq!(hop.host(), "host.example.com");
        assert_eq!(hop.port(), 22);
        assert_eq!(hop.host_port(), "host.example.com:22");
    }

    #[test]
    fn test_parse_ip_host() {
        let hop: HopSpec = "deploy01@10.0.0.7:2022".parse().unwrap();
        assert_eq!(hop.host_port(), "10.0.0.7:2022");
        assert_eq!(hop.to_string(), "deploy01@10.0.0.7:2022");
    }

    #[test]
    fn test_parse_invalid_format() {
        let invalid = vec![
            "host.example.com:22",
            "user@host.example.com",
            "user@host:ssh",
            "user@:22",
            "@host:22",
            "us-er@host:22",
            "user@host:22:33",
            "user@host:22 ",
            "",
        ];

        for input in invalid {
            match HopSpec::parse(input) {
                Err(HopParseError::InvalidFormat { input: got, .. }) => assert_eq!(got, input),
                Ok(hop) => panic!("'{}' parsed as {:?}", input, hop),
            }
        }
    }

    #[test]
    fn test_parse_port_out_of_range_wraps_int_error() {
        let err = HopSpec::parse("user@host:70000").unwrap_err();
        let HopParseError::InvalidFormat { source, .. } = &err;
        assert!(source.is_some());
        assert!(err.source().is_some());
        assert!(err.to_string().contains("invalid format"));
    }

    #[test]
    fn test_serde_as_string() {
        let hops: Vec<HopSpec> =
            serde_yaml::from_str("- alice@bastion:22\n- bob@inner.lan:2222\n").unwrap();
        assert_eq!(hops[1], HopSpec::new("bob", "inner.lan", 2222));

        let bad: Result<Vec<HopSpec>, _> = serde_yaml::from_str("- bastion:22\n");
        assert!(bad.is_err());
    }
}
