//! Normalises raw scanner output into a canonical, deduplicated scan.
//!
//! Two input shapes are accepted: the canonical JSON form
//! `{scanner_id?, target?, hosts:[{ip, ports:[{number, protocol, state?}]}]}`,
//! and a line-delimited per-port form (`ip:port/protocol`, one record per
//! line) some community scanners emit directly. Unknown JSON fields are
//! ignored; malformed individual records are dropped with a counter
//! increment rather than failing the whole scan — only input that is
//! wholly unparseable as either shape fails the step.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("input is not valid canonical JSON or line-delimited scan records")]
    Unparseable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(()),
        }
    }
}

/// A deduplicated `(ip, number, protocol)` triple within a canonical scan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalPort {
    pub number: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalHost {
    pub ip: String,
    pub ports: Vec<CanonicalPort>,
}

/// Outcome of normalisation: the deduplicated asset set plus a deterministic
/// `scan_id` derived from its contents, used downstream as the idempotence
/// key for observation edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalScan {
    pub scan_id: String,
    pub scanner_id: Option<String>,
    pub target: Option<String>,
    pub hosts: Vec<CanonicalHost>,
    /// Count of individual port/host records dropped for being malformed.
    pub dropped_records: u32,
}

impl CanonicalScan {
    pub fn host_count(&self) -> u32 {
        self.hosts.len() as u32
    }

    pub fn port_count(&self) -> u32 {
        self.hosts.iter().map(|h| h.ports.len() as u32).sum()
    }
}

#[derive(Debug, Deserialize)]
struct RawScan {
    scanner_id: Option<String>,
    target: Option<String>,
    hosts: Vec<RawHost>,
}

#[derive(Debug, Deserialize)]
struct RawHost {
    ip: String,
    #[serde(default)]
    ports: Vec<RawPort>,
}

#[derive(Debug, Deserialize)]
struct RawPort {
    number: u16,
    protocol: String,
    #[serde(default)]
    #[allow(dead_code)]
    state: Option<String>,
}

/// Parses `bytes` as either the canonical JSON scan form or line-delimited
/// `ip:port/protocol` records, producing a deduplicated `CanonicalScan`.
pub fn parse(bytes: &[u8]) -> Result<CanonicalScan, ParseError> {
    if let Ok(raw) = serde_json::from_slice::<RawScan>(bytes) {
        return Ok(normalise_json(raw));
    }

    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::Unparseable)?;
    let parsed = parse_line_delimited(text);
    if parsed.hosts.is_empty() && parsed.dropped_records == 0 {
        return Err(ParseError::Unparseable);
    }
    Ok(parsed)
}

fn normalise_json(raw: RawScan) -> CanonicalScan {
    let mut dropped = 0u32;
    let mut by_ip: std::collections::BTreeMap<String, BTreeSet<CanonicalPort>> =
        std::collections::BTreeMap::new();

    for host in raw.hosts {
        let entry = by_ip.entry(host.ip.clone()).or_default();
        for port in host.ports {
            match port.protocol.parse::<Protocol>() {
                Ok(protocol) if port.number >= 1 => {
                    entry.insert(CanonicalPort {
                        number: port.number,
                        protocol,
                    });
                }
                _ => dropped += 1,
            }
        }
    }

    build_scan(raw.scanner_id, raw.target, by_ip, dropped)
}

fn parse_line_delimited(text: &str) -> CanonicalScan {
    let mut dropped = 0u32;
    let mut by_ip: std::collections::BTreeMap<String, BTreeSet<CanonicalPort>> =
        std::collections::BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Some((ip, port)) => {
                by_ip.entry(ip).or_default().insert(port);
            }
            None => dropped += 1,
        }
    }

    build_scan(None, None, by_ip, dropped)
}

fn parse_line(line: &str) -> Option<(String, CanonicalPort)> {
    let (ip, rest) = line.split_once(':')?;
    let (number, protocol) = rest.split_once('/')?;
    if ip.is_empty() {
        return None;
    }
    let number: u16 = number.trim().parse().ok()?;
    if number == 0 {
        return None;
    }
    let protocol: Protocol = protocol.trim().parse().ok()?;
    Some((ip.to_string(), CanonicalPort { number, protocol }))
}

fn build_scan(
    scanner_id: Option<String>,
    target: Option<String>,
    by_ip: std::collections::BTreeMap<String, BTreeSet<CanonicalPort>>,
    dropped_records: u32,
) -> CanonicalScan {
    let hosts: Vec<CanonicalHost> = by_ip
        .into_iter()
        .map(|(ip, ports)| CanonicalHost {
            ip,
            ports: ports.into_iter().collect(),
        })
        .collect();

    let scan_id = compute_scan_id(&scanner_id, &target, &hosts);

    CanonicalScan {
        scan_id,
        scanner_id,
        target,
        hosts,
        dropped_records,
    }
}

/// Deterministic hash over the canonical contents: two scans with the same
/// hosts/ports (regardless of input ordering, since `hosts` is already
/// sorted by ip and each host's ports by `(number, protocol)`) hash equal.
fn compute_scan_id(
    scanner_id: &Option<String>,
    target: &Option<String>,
    hosts: &[CanonicalHost],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scanner_id.as_deref().unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(target.as_deref().unwrap_or("").as_bytes());
    for host in hosts {
        hasher.update([0u8]);
        hasher.update(host.ip.as_bytes());
        for port in &host.ports {
            hasher.update(b":");
            hasher.update(port.number.to_be_bytes());
            hasher.update(port.protocol.to_string().as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_json() {
        let input = br#"{"hosts":[{"ip":"192.0.2.1","ports":[{"number":22,"protocol":"tcp"}]}]}"#;
        let scan = parse(input).unwrap();
        assert_eq!(scan.hosts.len(), 1);
        assert_eq!(scan.hosts[0].ip, "192.0.2.1");
        assert_eq!(scan.hosts[0].ports[0].number, 22);
        assert_eq!(scan.dropped_records, 0);
    }

    #[test]
    fn deduplicates_repeated_ports() {
        let input = br#"{"hosts":[{"ip":"192.0.2.1","ports":[
            {"number":22,"protocol":"tcp"},
            {"number":22,"protocol":"tcp"}
        ]}]}"#;
        let scan = parse(input).unwrap();
        assert_eq!(scan.port_count(), 1);
    }

    #[test]
    fn malformed_port_is_dropped_not_fatal() {
        let input = br#"{"hosts":[{"ip":"192.0.2.1","ports":[
            {"number":22,"protocol":"tcp"},
            {"number":0,"protocol":"sctp"}
        ]}]}"#;
        let scan = parse(input).unwrap();
        assert_eq!(scan.port_count(), 1);
        assert_eq!(scan.dropped_records, 1);
    }

    #[test]
    fn parses_line_delimited_form() {
        let input = b"192.0.2.1:22/tcp\n192.0.2.1:443/tcp\nnot-a-record\n";
        let scan = parse(input).unwrap();
        assert_eq!(scan.port_count(), 2);
        assert_eq!(scan.dropped_records, 1);
    }

    #[test]
    fn wholly_unparseable_input_fails() {
        assert_eq!(parse(b"\x00\x01\x02"), Err(ParseError::Unparseable));
    }

    #[test]
    fn identical_content_yields_identical_scan_id() {
        let a = parse(br#"{"hosts":[{"ip":"192.0.2.1","ports":[{"number":22,"protocol":"tcp"}]}]}"#).unwrap();
        let b = parse(br#"{"hosts":[{"ip":"192.0.2.1","ports":[{"number":22,"protocol":"tcp"}]}]}"#).unwrap();
        assert_eq!(a.scan_id, b.scan_id);
    }

    #[test]
    fn different_content_yields_different_scan_id() {
        let a = parse(br#"{"hosts":[{"ip":"192.0.2.1","ports":[{"number":22,"protocol":"tcp"}]}]}"#).unwrap();
        let b = parse(br#"{"hosts":[{"ip":"192.0.2.2","ports":[{"number":22,"protocol":"tcp"}]}]}"#).unwrap();
        assert_ne!(a.scan_id, b.scan_id);
    }
}
