use std::collections::HashSet;
use std::net::IpAddr;

use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::{CacherError, Result};

/// The subset of a hardware payload we need in order to index it. The
/// original JSON text is kept verbatim elsewhere; this is parsed purely
/// to discover id/state/addresses, never re-serialized as the stored
/// payload.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "id")]
    id: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    instance: Option<RawInstance>,
    #[serde(default, rename = "ip_addresses")]
    ip_addresses: Vec<RawIp>,
    #[serde(default, rename = "network_ports")]
    network_ports: Vec<RawPort>,
}

#[derive(Debug, Deserialize)]
struct RawInstance {
    #[serde(default, rename = "ip_addresses")]
    ip_addresses: Vec<RawIp>,
}

#[derive(Debug, Deserialize)]
struct RawIp {
    address: String,
}

#[derive(Debug, Deserialize)]
struct RawPort {
    data: RawPortData,
}

#[derive(Debug, Deserialize)]
struct RawPortData {
    #[serde(default)]
    mac: Option<String>,
}

/// A decoded, indexable view of a hardware payload. `payload` is the
/// original JSON text, unmodified, so round-tripping never drops fields
/// the index doesn't care about.
pub struct Record {
    pub id: Uuid,
    pub deleted: bool,
    pub payload: String,
    pub ips: HashSet<IpAddr>,
    pub macs: HashSet<String>,
}

impl Record {
    /// Parse a raw JSON hardware payload into an indexable record.
    ///
    /// When `state == "deleted"` the new record carries no addresses at
    /// all, regardless of what the payload itself lists — matching the
    /// upstream convention that a deletion tombstone still includes the
    /// last-known addresses for audit purposes but must not keep them
    /// indexed.
    pub fn parse(payload: &str) -> Result<Self> {
        let raw: RawRecord = serde_json::from_str(payload)?;
        let id = Uuid::parse_str(raw.id.trim())
            .map_err(|_| CacherError::InvalidId(raw.id.clone()))?;
        let deleted = raw.state == "deleted";

        let mut ips = HashSet::new();
        let mut macs = HashSet::new();
        if !deleted {
            for entry in raw.ip_addresses.iter().chain(
                raw.instance
                    .as_ref()
                    .map(|i| i.ip_addresses.iter())
                    .into_iter()
                    .flatten(),
            ) {
                // Upstream is known to send empty-string addresses; skip
                // them rather than failing the whole record.
                if entry.address.trim().is_empty() {
                    warn!(id = %id, "skipping empty ip address");
                    continue;
                }
                ips.insert(parse_ip(&entry.address)?);
            }
            for port in &raw.network_ports {
                match &port.data.mac {
                    Some(mac) if !mac.trim().is_empty() => {
                        macs.insert(parse_mac(mac)?);
                    }
                    Some(_) | None => {
                        warn!(id = %id, "skipping empty or null mac address");
                    }
                }
            }
        }

        Ok(Record {
            id,
            deleted,
            payload: payload.to_string(),
            ips,
            macs,
        })
    }
}

/// Parse and canonicalize an IP address. Canonical `IpAddr` equality
/// already makes `::c0c0` and `::C0C0` compare equal once parsed.
pub fn parse_ip(s: &str) -> Result<IpAddr> {
    s.trim()
        .parse::<IpAddr>()
        .map_err(|_| CacherError::InvalidIp(s.to_string()))
}

/// Parse a MAC address written with either `:` or `-` separators and
/// render it lowercase, colon-separated, e.g. `aa:bb:cc:dd:ee:ff`.
pub fn parse_mac(s: &str) -> Result<String> {
    let s = s.trim().to_lowercase();
    let sep = if s.contains('-') { '-' } else { ':' };
    let parts: Vec<&str> = s.split(sep).collect();
    if parts.len() != 6 {
        return Err(CacherError::InvalidMac(s));
    }
    let mut bytes = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        bytes[i] = u8::from_str_radix(part, 16).map_err(|_| CacherError::InvalidMac(s.clone()))?;
    }
    Ok(bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":"))
}

/// Normalize a caller-supplied IP string the same way a stored IP is
/// normalized, for use in lookups.
pub fn normalize_ip_query(s: &str) -> Result<IpAddr> {
    parse_ip(s)
}

/// Normalize a caller-supplied MAC string the same way a stored MAC is
/// normalized, for use in lookups.
pub fn normalize_mac_query(s: &str) -> Result<String> {
    parse_mac(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ip_and_mac_across_sources() {
        let payload = serde_json::json!({
            "id": "11111111-1111-1111-1111-111111111111",
            "state": "provisioning",
            "ip_addresses": [{"address": "10.0.0.1"}],
            "instance": {"ip_addresses": [{"address": "10.0.0.2"}]},
            "network_ports": [{"data": {"mac": "AA-BB-CC-DD-EE-FF"}}],
        })
        .to_string();

        let rec = Record::parse(&payload).unwrap();
        assert!(!rec.deleted);
        assert!(rec.ips.contains(&"10.0.0.1".parse().unwrap()));
        assert!(rec.ips.contains(&"10.0.0.2".parse().unwrap()));
        assert!(rec.macs.contains("aa:bb:cc:dd:ee:ff"));
        assert_eq!(rec.payload, payload);
    }

    #[test]
    fn deleted_state_drops_all_addresses() {
        let payload = serde_json::json!({
            "id": "11111111-1111-1111-1111-111111111111",
            "state": "deleted",
            "ip_addresses": [{"address": "10.0.0.1"}],
            "network_ports": [{"data": {"mac": "aa:bb:cc:dd:ee:ff"}}],
        })
        .to_string();

        let rec = Record::parse(&payload).unwrap();
        assert!(rec.deleted);
        assert!(rec.ips.is_empty());
        assert!(rec.macs.is_empty());
    }

    #[test]
    fn ipv6_case_insensitive_canonical_form() {
        let a = parse_ip("::C0C0").unwrap();
        let b = parse_ip("::c0c0").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_ip_and_empty_or_null_mac_are_skipped_not_rejected() {
        let payload = serde_json::json!({
            "id": "11111111-1111-1111-1111-111111111111",
            "state": "provisioning",
            "ip_addresses": [{"address": ""}, {"address": "10.0.0.1"}],
            "network_ports": [
                {"data": {"mac": ""}},
                {"data": {}},
                {"data": {"mac": "aa:bb:cc:dd:ee:ff"}},
            ],
        })
        .to_string();

        let rec = Record::parse(&payload).unwrap();
        assert_eq!(rec.ips.len(), 1);
        assert!(rec.ips.contains(&"10.0.0.1".parse().unwrap()));
        assert_eq!(rec.macs.len(), 1);
        assert!(rec.macs.contains("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn mac_separators_and_case_normalize_to_the_same_key() {
        let a = parse_mac("00-00-00-00-00-0a").unwrap();
        let b = parse_mac("00:00:00:00:00:0A").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_bad_uuid() {
        let payload = serde_json::json!({"id": "not-a-uuid", "state": "provisioning"}).to_string();
        assert!(Record::parse(&payload).is_err());
    }
}
