// Certificate normalizer
//
// Converts decoded log entries into the canonical certstream event model.
// For precertificates every derived value (DER, hashes, parsed fields) comes
// from the submitted precertificate, never from the TBS in the Merkle leaf.

use crate::error::CertstreamError;
use crate::models::{Data, Entry, Extensions, LeafCert, Source, Subject};
use crate::Result;
use base64::Engine;
use chrono::Utc;
use lazy_static::lazy_static;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use x509_parser::prelude::*;

use super::entry::{EntryKind, RawEntry};

/// CT poison extension marking a precertificate
const CT_POISON_OID: &str = "1.3.6.1.4.1.11129.2.4.3";

lazy_static! {
    /// Signature algorithm OID -> lowercased "hash, algo" name.
    static ref SIGNATURE_ALGORITHMS: HashMap<&'static str, &'static str> = HashMap::from([
        ("1.2.840.113549.1.1.2", "md2, rsa"),
        ("1.2.840.113549.1.1.4", "md5, rsa"),
        ("1.2.840.113549.1.1.5", "sha1, rsa"),
        ("1.2.840.113549.1.1.11", "sha256, rsa"),
        ("1.2.840.113549.1.1.12", "sha384, rsa"),
        ("1.2.840.113549.1.1.13", "sha512, rsa"),
        ("1.2.840.10040.4.3", "dsa, sha1"),
        ("2.16.840.1.101.3.4.3.2", "dsa, sha256"),
        ("1.2.840.10045.4.1", "ecdsa, sha1"),
        ("1.2.840.10045.4.3.2", "ecdsa, sha256"),
        ("1.2.840.10045.4.3.3", "ecdsa, sha384"),
        ("1.2.840.10045.4.3.4", "ecdsa, sha512"),
        ("1.3.101.112", "ed25519"),
    ]);
}

/// Builds certstream events for entries of one CT log.
pub struct Normalizer {
    operator: String,
    name: String,
    ct_url: String,
    normalized_url: String,
}

impl Normalizer {
    /// `ct_url` must carry a scheme and no trailing slash.
    pub fn new(operator: &str, name: &str, ct_url: &str) -> Self {
        Self {
            operator: operator.to_string(),
            name: name.to_string(),
            ct_url: ct_url.to_string(),
            normalized_url: super::registry::normalize_ct_url(ct_url),
        }
    }

    /// Convert a raw entry into the canonical event. A parse failure of the
    /// leaf or of any chain certificate aborts the whole event.
    pub fn normalize(&self, raw: &RawEntry) -> Result<Entry> {
        let leaf_cert = leaf_cert_from_der(&raw.leaf_der)?;

        let mut chain = Vec::with_capacity(raw.chain_der.len());
        for der in &raw.chain_der {
            chain.push(leaf_cert_from_der(der)?);
        }

        let update_type = match raw.kind {
            EntryKind::X509 => "X509LogEntry",
            EntryKind::Precert => "PrecertLogEntry",
        };

        let data = Data {
            cert_index: raw.index,
            cert_link: format!(
                "{}/ct/v1/get-entries?start={}&end={}",
                self.ct_url, raw.index, raw.index
            ),
            chain: Some(chain),
            leaf_cert,
            seen: Utc::now().timestamp_millis() as f64 / 1_000.0,
            source: Source {
                name: self.name.clone(),
                url: self.ct_url.clone(),
                operator: self.operator.clone(),
                normalized_url: self.normalized_url.clone(),
            },
            update_type: update_type.to_string(),
        };

        Ok(Entry::new(data))
    }
}

/// Parse one DER certificate into the LeafCert shape, hashing the exact
/// bytes that were handed in.
pub fn leaf_cert_from_der(der: &[u8]) -> Result<LeafCert> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| CertstreamError::Parse {
        message: format!("could not parse X.509 certificate: {}", e),
    })?;

    let is_ca = cert
        .basic_constraints()
        .ok()
        .flatten()
        .map(|bc| bc.value.ca)
        .unwrap_or(false);

    let mut all_domains: Vec<String> = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                if !all_domains.iter().any(|d| d == dns) {
                    all_domains.push(dns.to_string());
                }
            }
        }
    }

    let subject = build_subject(cert.subject());
    let issuer = build_subject(cert.issuer());

    // A non-CA leaf with a CN not covered by the SANs still serves that name.
    if let Some(cn) = subject.cn.as_deref() {
        if !cn.is_empty() && !is_ca && !all_domains.iter().any(|d| d == cn) {
            all_domains.push(cn.to_string());
        }
    }

    let fingerprint = sha1_fingerprint(der);

    Ok(LeafCert {
        all_domains,
        as_der: base64::engine::general_purpose::STANDARD.encode(der),
        extensions: build_extensions(&cert),
        sha1: fingerprint.clone(),
        fingerprint,
        sha256: sha256_fingerprint(der),
        not_after: cert.validity().not_after.timestamp(),
        not_before: cert.validity().not_before.timestamp(),
        serial_number: format_serial(&cert),
        signature_algorithm: signature_algorithm_name(&cert.signature_algorithm),
        subject,
        issuer,
        is_ca,
    })
}

fn build_subject(name: &X509Name<'_>) -> Subject {
    let c = join_attribute_values(name.iter_country());
    let cn = Some(
        name.iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .unwrap_or("")
            .to_string(),
    );
    let l = join_attribute_values(name.iter_locality());
    let o = join_attribute_values(name.iter_organization());
    let ou = join_attribute_values(name.iter_organizational_unit());
    // ST carries the streetAddress RDN; email names surface only through
    // subjectAltName.
    let st = join_attribute_values(name.iter_by_oid(&oid_registry::OID_X509_STREET_ADDRESS));

    let mut aggregated = String::new();
    if let Some(v) = &c {
        aggregated.push_str(&format!("/C={}", v));
    }
    if let Some(v) = &cn {
        aggregated.push_str(&format!("/CN={}", v));
    }
    if let Some(v) = &l {
        aggregated.push_str(&format!("/L={}", v));
    }
    if let Some(v) = &o {
        aggregated.push_str(&format!("/O={}", v));
    }
    if let Some(v) = &ou {
        aggregated.push_str(&format!("/OU={}", v));
    }
    if let Some(v) = &st {
        aggregated.push_str(&format!("/ST={}", v));
    }

    Subject {
        c,
        cn,
        l,
        o,
        ou,
        st,
        aggregated: Some(aggregated),
        email_address: None,
    }
}

fn join_attribute_values<'a>(
    iter: impl Iterator<Item = &'a AttributeTypeAndValue<'a>>,
) -> Option<String> {
    let values: Vec<&str> = iter.filter_map(|attr| attr.as_str().ok()).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}

fn build_extensions(cert: &X509Certificate<'_>) -> Extensions {
    let mut out = Extensions::default();

    for ext in cert.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                if let Some(key_id) = &aki.key_identifier {
                    out.authority_key_identifier = Some(format_key_id(key_id.0));
                }
            }
            ParsedExtension::SubjectKeyIdentifier(ski) => {
                out.subject_key_identifier = Some(format_key_id(ski.0));
            }
            ParsedExtension::KeyUsage(ku) => {
                out.key_usage = Some(key_usage_to_string(ku));
            }
            ParsedExtension::BasicConstraints(bc) => {
                out.basic_constraints = Some(format!("CA:{}", bc.ca).to_uppercase());
            }
            ParsedExtension::SubjectAlternativeName(san) => {
                out.subject_alt_name = Some(format_subject_alt_name(san));
            }
            ParsedExtension::AuthorityInfoAccess(aia) => {
                out.authority_info_access = Some(format_authority_info_access(aia));
            }
            ParsedExtension::ExtendedKeyUsage(eku) => {
                out.extended_key_usage = Some(format_extended_key_usage(eku));
            }
            ParsedExtension::CertificatePolicies(policies) => {
                out.certificate_policies = Some(
                    policies
                        .iter()
                        .map(|policy| policy.policy_id.to_id_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                );
            }
            _ => {
                if ext.oid.to_id_string() == CT_POISON_OID {
                    out.ctl_poison_byte = true;
                }
            }
        }
    }

    out
}

fn format_subject_alt_name(san: &SubjectAlternativeName<'_>) -> String {
    let mut parts = Vec::new();

    for name in &san.general_names {
        if let GeneralName::DNSName(dns) = name {
            parts.push(format!("DNS:{}", dns));
        }
    }
    for name in &san.general_names {
        if let GeneralName::RFC822Name(email) = name {
            parts.push(format!("email:{}", email));
        }
    }
    for name in &san.general_names {
        if let GeneralName::IPAddress(ip) = name {
            parts.push(format!("IP Address:{}", format_ip(ip)));
        }
    }

    parts.join(", ")
}

fn format_ip(bytes: &[u8]) -> String {
    match bytes.len() {
        4 => Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).to_string(),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            Ipv6Addr::from(octets).to_string()
        }
        _ => hex::encode(bytes),
    }
}

fn format_authority_info_access(aia: &AuthorityInfoAccess<'_>) -> String {
    let mut parts = Vec::new();

    for desc in &aia.accessdescs {
        if desc.access_method == oid_registry::OID_PKIX_ACCESS_DESCRIPTOR_CA_ISSUERS {
            if let GeneralName::URI(uri) = &desc.access_location {
                parts.push(format!("URI:{}", uri));
            }
        }
    }
    for desc in &aia.accessdescs {
        if desc.access_method == oid_registry::OID_PKIX_ACCESS_DESCRIPTOR_OCSP {
            if let GeneralName::URI(uri) = &desc.access_location {
                parts.push(format!("URI:{}", uri));
            }
        }
    }

    parts.join(", ")
}

fn format_extended_key_usage(eku: &ExtendedKeyUsage<'_>) -> String {
    let mut parts = Vec::new();

    if eku.any {
        parts.push("Any".to_string());
    }
    if eku.server_auth {
        parts.push("Server Authentication".to_string());
    }
    if eku.client_auth {
        parts.push("Client Authentication".to_string());
    }
    if eku.code_signing {
        parts.push("Code Signing".to_string());
    }
    if eku.email_protection {
        parts.push("Email Protection".to_string());
    }
    if eku.time_stamping {
        parts.push("Time Stamping".to_string());
    }
    if eku.ocsp_signing {
        parts.push("OCSP Signing".to_string());
    }
    for oid in &eku.other {
        parts.push(oid.to_id_string());
    }

    parts.join(", ")
}

/// Render the key usage bits as a comma-separated list in bit order.
fn key_usage_to_string(ku: &KeyUsage) -> String {
    let mut parts = Vec::new();

    if ku.digital_signature() {
        parts.push("Digital Signature");
    }
    if ku.non_repudiation() {
        parts.push("Content Commitment");
    }
    if ku.key_encipherment() {
        parts.push("Key Encipherment");
    }
    if ku.data_encipherment() {
        parts.push("Data Encipherment");
    }
    if ku.key_agreement() {
        parts.push("Key Agreement");
    }
    if ku.key_cert_sign() {
        parts.push("Certificate Signing");
    }
    if ku.crl_sign() {
        parts.push("CRL Signing");
    }
    if ku.encipher_only() {
        parts.push("Encipher Only");
    }
    if ku.decipher_only() {
        parts.push("Decipher Only");
    }

    parts.join(", ")
}

fn signature_algorithm_name(alg: &AlgorithmIdentifier<'_>) -> String {
    let oid = alg.algorithm.to_id_string();
    let params = alg.parameters.as_ref().map(|any| any.data);
    signature_algorithm_from_oid(&oid, params)
}

/// Fixed lookup from signature OID to the lowercased "hash, algo" name.
/// RSASSA-PSS carries its hash inside the parameters.
fn signature_algorithm_from_oid(oid: &str, params: Option<&[u8]>) -> String {
    if let Some(name) = SIGNATURE_ALGORITHMS.get(oid) {
        return (*name).to_string();
    }

    if oid == "1.2.840.113549.1.1.10" {
        return format!("{}, rsa-pss", pss_hash_name(params));
    }

    "unknown".to_string()
}

/// The DER-encoded hash OID inside the RSASSA-PSS parameters.
fn pss_hash_name(params: Option<&[u8]>) -> &'static str {
    const SHA384: &[u8] = &[0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02];
    const SHA512: &[u8] = &[0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03];

    let Some(data) = params else {
        return "sha256";
    };

    if data.windows(SHA384.len()).any(|w| w == SHA384) {
        "sha384"
    } else if data.windows(SHA512.len()).any(|w| w == SHA512) {
        "sha512"
    } else {
        "sha256"
    }
}

fn format_serial(cert: &X509Certificate<'_>) -> String {
    let mut serial = cert.serial.to_str_radix(16).to_uppercase();
    if serial.len() % 2 == 1 {
        serial.insert(0, '0');
    }
    serial
}

/// "keyid:" plus lowercase hex pairs joined by ':'.
fn format_key_id(key_id: &[u8]) -> String {
    let pairs: Vec<String> = key_id.iter().map(|b| format!("{:02x}", b)).collect();
    format!("keyid:{}", pairs.join(":"))
}

/// Uppercase hex pairs joined by ':'.
fn hex_fingerprint(digest: &[u8]) -> String {
    let pairs: Vec<String> = digest.iter().map(|b| format!("{:02X}", b)).collect();
    pairs.join(":")
}

pub fn sha1_fingerprint(data: &[u8]) -> String {
    hex_fingerprint(&Sha1::digest(data))
}

pub fn sha256_fingerprint(data: &[u8]) -> String {
    hex_fingerprint(&Sha256::digest(data))
}
