// Wire-level event model
//
// Field order and naming follow the certstream JSON schema exactly; struct
// declaration order is serialization order.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A single certificate update as broadcast to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub data: Data,
    pub message_type: String,
}

impl Entry {
    pub fn new(data: Data) -> Self {
        Self {
            data,
            message_type: "certificate_update".to_string(),
        }
    }

    /// Full projection: the complete event as JSON bytes.
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Lite projection: the chain and the leaf's DER representation are
    /// cleared before serializing. Both fields are omit-when-empty, so the
    /// resulting JSON simply lacks those keys.
    pub fn to_json_lite(&self) -> Vec<u8> {
        let mut lite = self.clone();
        lite.data.chain = None;
        lite.data.leaf_cert.as_der = String::new();
        serde_json::to_vec(&lite).unwrap_or_default()
    }

    /// Domains projection: only the message type and the leaf's domain list.
    pub fn to_json_domains(&self) -> Vec<u8> {
        let domains = DomainsEntry {
            data: self.data.leaf_cert.all_domains.clone(),
            message_type: "dns_entries".to_string(),
        };
        serde_json::to_vec(&domains).unwrap_or_default()
    }
}

/// An entry with its three projections serialized lazily on first use and
/// cached, so the cost is amortized across all subscribers of one kind.
#[derive(Debug)]
pub struct CachedEntry {
    entry: Entry,
    full: OnceLock<Bytes>,
    lite: OnceLock<Bytes>,
    domains: OnceLock<Bytes>,
}

impl CachedEntry {
    pub fn new(entry: Entry) -> Self {
        Self {
            entry,
            full: OnceLock::new(),
            lite: OnceLock::new(),
            domains: OnceLock::new(),
        }
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn full(&self) -> Bytes {
        self.full
            .get_or_init(|| Bytes::from(self.entry.to_json()))
            .clone()
    }

    pub fn lite(&self) -> Bytes {
        self.lite
            .get_or_init(|| Bytes::from(self.entry.to_json_lite()))
            .clone()
    }

    pub fn domains(&self) -> Bytes {
        self.domains
            .get_or_init(|| Bytes::from(self.entry.to_json_domains()))
            .clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Data {
    pub cert_index: u64,
    pub cert_link: String,
    #[serde(default, skip_serializing_if = "chain_is_empty")]
    pub chain: Option<Vec<LeafCert>>,
    pub leaf_cert: LeafCert,
    pub seen: f64,
    pub source: Source,
    pub update_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub url: String,
    #[serde(skip)]
    pub operator: String,
    #[serde(skip)]
    pub normalized_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeafCert {
    pub all_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub as_der: String,
    pub extensions: Extensions,
    pub fingerprint: String,
    pub sha1: String,
    pub sha256: String,
    pub not_after: i64,
    pub not_before: i64,
    pub serial_number: String,
    pub signature_algorithm: String,
    pub subject: Subject,
    pub issuer: Subject,
    pub is_ca: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subject {
    #[serde(rename = "C")]
    pub c: Option<String>,
    #[serde(rename = "CN")]
    pub cn: Option<String>,
    #[serde(rename = "L")]
    pub l: Option<String>,
    #[serde(rename = "O")]
    pub o: Option<String>,
    #[serde(rename = "OU")]
    pub ou: Option<String>,
    #[serde(rename = "ST")]
    pub st: Option<String>,
    pub aggregated: Option<String>,
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extensions {
    #[serde(rename = "authorityInfoAccess", skip_serializing_if = "Option::is_none")]
    pub authority_info_access: Option<String>,
    #[serde(
        rename = "authorityKeyIdentifier",
        skip_serializing_if = "Option::is_none"
    )]
    pub authority_key_identifier: Option<String>,
    #[serde(rename = "basicConstraints", skip_serializing_if = "Option::is_none")]
    pub basic_constraints: Option<String>,
    #[serde(rename = "certificatePolicies", skip_serializing_if = "Option::is_none")]
    pub certificate_policies: Option<String>,
    #[serde(
        rename = "ctlSignedCertificateTimestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub ctl_signed_certificate_timestamp: Option<String>,
    #[serde(rename = "extendedKeyUsage", skip_serializing_if = "Option::is_none")]
    pub extended_key_usage: Option<String>,
    #[serde(rename = "keyUsage", skip_serializing_if = "Option::is_none")]
    pub key_usage: Option<String>,
    #[serde(rename = "subjectAltName", skip_serializing_if = "Option::is_none")]
    pub subject_alt_name: Option<String>,
    #[serde(rename = "subjectKeyIdentifier", skip_serializing_if = "Option::is_none")]
    pub subject_key_identifier: Option<String>,
    #[serde(rename = "ctlPoisonByte", default, skip_serializing_if = "is_false")]
    pub ctl_poison_byte: bool,
}

/// Domains-only message shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainsEntry {
    pub data: Vec<String>,
    pub message_type: String,
}

fn chain_is_empty(chain: &Option<Vec<LeafCert>>) -> bool {
    chain.as_ref().map_or(true, |c| c.is_empty())
}

fn is_false(value: &bool) -> bool {
    !value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> Entry {
        let leaf = LeafCert {
            all_domains: vec!["foo.example".to_string(), "www.foo.example".to_string()],
            as_der: "MIIB".to_string(),
            fingerprint: "AA:BB".to_string(),
            sha1: "AA:BB".to_string(),
            sha256: "CC:DD".to_string(),
            not_after: 1_800_000_000,
            not_before: 1_700_000_000,
            serial_number: "0A".to_string(),
            signature_algorithm: "sha256, rsa".to_string(),
            subject: Subject {
                cn: Some("foo.example".to_string()),
                aggregated: Some("/CN=foo.example".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        Entry::new(Data {
            cert_index: 100,
            cert_link: "https://ct.example/ct/ct/v1/get-entries?start=100&end=100".to_string(),
            chain: Some(vec![LeafCert::default()]),
            leaf_cert: leaf,
            seen: 1_700_000_000.5,
            source: Source {
                name: "X".to_string(),
                url: "https://ct.example/ct".to_string(),
                operator: "ExampleOp".to_string(),
                normalized_url: "ct.example/ct".to_string(),
            },
            update_type: "X509LogEntry".to_string(),
        })
    }

    #[test]
    fn test_full_projection_contains_chain_and_der() {
        let entry = sample_entry();
        let json: serde_json::Value = serde_json::from_slice(&entry.to_json()).unwrap();
        assert_eq!(json["message_type"], "certificate_update");
        assert!(json["data"]["chain"].is_array());
        assert_eq!(json["data"]["leaf_cert"]["as_der"], "MIIB");
        // operator and normalized_url never appear on the wire
        assert!(json["data"]["source"].get("operator").is_none());
        assert!(json["data"]["source"].get("normalized_url").is_none());
    }

    #[test]
    fn test_lite_projection_drops_chain_and_der() {
        let entry = sample_entry();
        let full: serde_json::Value = serde_json::from_slice(&entry.to_json()).unwrap();
        let lite: serde_json::Value = serde_json::from_slice(&entry.to_json_lite()).unwrap();

        assert!(lite["data"].get("chain").is_none());
        assert!(lite["data"]["leaf_cert"].get("as_der").is_none());

        // Everything else is byte-identical between the projections
        let mut full_stripped = full.clone();
        full_stripped["data"]
            .as_object_mut()
            .unwrap()
            .remove("chain");
        full_stripped["data"]["leaf_cert"]
            .as_object_mut()
            .unwrap()
            .remove("as_der");
        assert_eq!(full_stripped, lite);
    }

    #[test]
    fn test_domains_projection_shape() {
        let entry = sample_entry();
        let json: serde_json::Value = serde_json::from_slice(&entry.to_json_domains()).unwrap();
        assert_eq!(json["message_type"], "dns_entries");
        assert_eq!(
            json["data"],
            serde_json::json!(["foo.example", "www.foo.example"])
        );
    }

    #[test]
    fn test_cached_projections_are_stable() {
        let cached = CachedEntry::new(sample_entry());
        let first = cached.full();
        let second = cached.full();
        assert_eq!(first, second);
        assert_eq!(cached.lite(), cached.lite());
    }

    #[test]
    fn test_empty_chain_is_omitted() {
        let mut entry = sample_entry();
        entry.data.chain = Some(Vec::new());
        let json: serde_json::Value = serde_json::from_slice(&entry.to_json()).unwrap();
        assert!(json["data"].get("chain").is_none());
    }

    #[test]
    fn test_all_domains_serializes_as_array_when_empty() {
        let mut entry = sample_entry();
        entry.data.leaf_cert.all_domains = Vec::new();
        let json: serde_json::Value = serde_json::from_slice(&entry.to_json()).unwrap();
        assert_eq!(json["data"]["leaf_cert"]["all_domains"], serde_json::json!([]));
    }

    #[test]
    fn test_poison_byte_omitted_when_false() {
        let entry = sample_entry();
        let json: serde_json::Value = serde_json::from_slice(&entry.to_json()).unwrap();
        assert!(json["data"]["leaf_cert"]["extensions"]
            .get("ctlPoisonByte")
            .is_none());
    }
}
