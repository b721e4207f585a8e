// End-to-end normalization scenarios: raw log entries through the
// normalizer into the three wire projections.

mod common;

use certstream_server::ct_logs::normalizer::{leaf_cert_from_der, sha1_fingerprint};
use certstream_server::ct_logs::{EntryKind, Normalizer, RawEntry};
use common::{build_cert, CertSpec};

fn raw_x509_entry(index: u64, leaf: Vec<u8>, chain: Vec<Vec<u8>>) -> RawEntry {
    RawEntry {
        index,
        timestamp: 1_700_000_000_000,
        kind: EntryKind::X509,
        leaf_der: leaf,
        chain_der: chain,
        issuer_key_hash: None,
    }
}

fn example_normalizer() -> Normalizer {
    Normalizer::new("ExampleOp", "Example log", "https://ct.example/ct")
}

#[test]
fn happy_path_x509_event() {
    let leaf = build_cert(&CertSpec {
        sans: &["foo.example", "www.foo.example"],
        ..Default::default()
    });
    let issuer = build_cert(&CertSpec {
        subject_cn: "Example CA",
        is_ca: true,
        ..Default::default()
    });

    let entry = example_normalizer()
        .normalize(&raw_x509_entry(100, leaf, vec![issuer]))
        .unwrap();

    assert_eq!(entry.message_type, "certificate_update");
    assert_eq!(entry.data.cert_index, 100);
    assert_eq!(entry.data.update_type, "X509LogEntry");
    assert_eq!(entry.data.source.url, "https://ct.example/ct");
    assert_eq!(entry.data.source.normalized_url, "ct.example/ct");
    assert_eq!(entry.data.source.operator, "ExampleOp");
    assert_eq!(
        entry.data.cert_link,
        "https://ct.example/ct/ct/v1/get-entries?start=100&end=100"
    );

    let leaf_cert = &entry.data.leaf_cert;
    // CN is already covered by the SANs and must not be duplicated
    assert_eq!(
        leaf_cert.all_domains,
        vec!["foo.example".to_string(), "www.foo.example".to_string()]
    );
    assert_eq!(leaf_cert.subject.cn.as_deref(), Some("foo.example"));
    assert_eq!(leaf_cert.issuer.cn.as_deref(), Some("Example CA"));
    assert_eq!(leaf_cert.not_before, 1_700_000_000);
    assert_eq!(leaf_cert.not_after, 1_800_000_000);
    assert_eq!(leaf_cert.serial_number, "010203");
    assert_eq!(leaf_cert.signature_algorithm, "sha256, rsa");
    assert!(!leaf_cert.is_ca);

    let chain = entry.data.chain.as_ref().unwrap();
    assert_eq!(chain.len(), 1);
    assert!(chain[0].is_ca);
    assert_eq!(chain[0].subject.cn.as_deref(), Some("Example CA"));
}

#[test]
fn cert_link_matches_source_url() {
    let leaf = build_cert(&CertSpec::default());
    let entry = example_normalizer()
        .normalize(&raw_x509_entry(42, leaf, Vec::new()))
        .unwrap();

    let expected = format!(
        "{}/ct/v1/get-entries?start={}&end={}",
        entry.data.source.url.trim_end_matches('/'),
        entry.data.cert_index,
        entry.data.cert_index
    );
    assert_eq!(entry.data.cert_link, expected);
}

#[test]
fn cn_appended_when_missing_from_sans() {
    let leaf = build_cert(&CertSpec {
        subject_cn: "cn-only.example",
        sans: &["alt.example"],
        ..Default::default()
    });
    let entry = example_normalizer()
        .normalize(&raw_x509_entry(0, leaf, Vec::new()))
        .unwrap();

    assert_eq!(
        entry.data.leaf_cert.all_domains,
        vec!["alt.example".to_string(), "cn-only.example".to_string()]
    );
}

#[test]
fn ca_common_name_not_added_to_domains() {
    let leaf = build_cert(&CertSpec {
        subject_cn: "Example Root",
        is_ca: true,
        ..Default::default()
    });
    let entry = example_normalizer()
        .normalize(&raw_x509_entry(0, leaf, Vec::new()))
        .unwrap();

    assert!(entry.data.leaf_cert.is_ca);
    assert!(entry.data.leaf_cert.all_domains.is_empty());

    // all_domains is still serialized as an array
    let json: serde_json::Value = serde_json::from_slice(&entry.to_json()).unwrap();
    assert_eq!(json["data"]["leaf_cert"]["all_domains"], serde_json::json!([]));
}

#[test]
fn san_duplicates_removed() {
    let leaf = build_cert(&CertSpec {
        sans: &["dup.example", "dup.example", "other.example"],
        ..Default::default()
    });
    let entry = example_normalizer()
        .normalize(&raw_x509_entry(0, leaf, Vec::new()))
        .unwrap();

    let domains = &entry.data.leaf_cert.all_domains;
    assert_eq!(
        domains.iter().filter(|d| d.as_str() == "dup.example").count(),
        1
    );
}

#[test]
fn fingerprints_match_leaf_der() {
    let leaf = build_cert(&CertSpec::default());
    let expected_sha1 = sha1_fingerprint(&leaf);

    let entry = example_normalizer()
        .normalize(&raw_x509_entry(0, leaf, Vec::new()))
        .unwrap();
    let leaf_cert = &entry.data.leaf_cert;

    assert_eq!(leaf_cert.fingerprint, leaf_cert.sha1);
    assert_eq!(leaf_cert.sha1, expected_sha1);
    assert_eq!(leaf_cert.sha1.len(), 59);
    assert!(leaf_cert
        .sha1
        .chars()
        .all(|c| c == ':' || (c.is_ascii_hexdigit() && !c.is_ascii_lowercase())));
}

#[test]
fn precert_event_derives_everything_from_submitted_der() {
    let submitted = build_cert(&CertSpec {
        sans: &["pre.example"],
        with_poison: true,
        ..Default::default()
    });
    let issuer = build_cert(&CertSpec {
        subject_cn: "Example CA",
        is_ca: true,
        ..Default::default()
    });

    let raw = RawEntry {
        index: 7,
        timestamp: 1_700_000_000_000,
        kind: EntryKind::Precert,
        leaf_der: submitted.clone(),
        chain_der: vec![issuer],
        issuer_key_hash: Some([1u8; 32]),
    };

    let entry = example_normalizer().normalize(&raw).unwrap();
    assert_eq!(entry.data.update_type, "PrecertLogEntry");

    let leaf_cert = &entry.data.leaf_cert;
    assert_eq!(leaf_cert.sha1, sha1_fingerprint(&submitted));
    assert_eq!(leaf_cert.fingerprint, leaf_cert.sha1);
    assert!(leaf_cert.extensions.ctl_poison_byte);

    use base64::Engine;
    let expected_der = base64::engine::general_purpose::STANDARD.encode(&submitted);
    assert_eq!(leaf_cert.as_der, expected_der);

    let json: serde_json::Value = serde_json::from_slice(&entry.to_json()).unwrap();
    assert_eq!(json["data"]["leaf_cert"]["extensions"]["ctlPoisonByte"], true);
}

#[test]
fn chain_parse_failure_aborts_event() {
    let leaf = build_cert(&CertSpec::default());
    let raw = raw_x509_entry(0, leaf, vec![b"not a certificate".to_vec()]);

    assert!(example_normalizer().normalize(&raw).is_err());
}

#[test]
fn lite_projection_differs_only_in_chain_and_der() {
    let leaf = build_cert(&CertSpec {
        sans: &["foo.example"],
        ..Default::default()
    });
    let issuer = build_cert(&CertSpec {
        subject_cn: "Example CA",
        is_ca: true,
        ..Default::default()
    });
    let entry = example_normalizer()
        .normalize(&raw_x509_entry(100, leaf, vec![issuer]))
        .unwrap();

    let mut full: serde_json::Value = serde_json::from_slice(&entry.to_json()).unwrap();
    let lite: serde_json::Value = serde_json::from_slice(&entry.to_json_lite()).unwrap();

    assert!(lite["data"].get("chain").is_none());
    assert!(lite["data"]["leaf_cert"].get("as_der").is_none());

    full["data"].as_object_mut().unwrap().remove("chain");
    full["data"]["leaf_cert"]
        .as_object_mut()
        .unwrap()
        .remove("as_der");
    assert_eq!(full, lite);
}

#[test]
fn domains_projection_shape() {
    let leaf = build_cert(&CertSpec {
        sans: &["foo.example", "www.foo.example"],
        ..Default::default()
    });
    let entry = example_normalizer()
        .normalize(&raw_x509_entry(100, leaf, Vec::new()))
        .unwrap();

    let json: serde_json::Value = serde_json::from_slice(&entry.to_json_domains()).unwrap();
    assert_eq!(json["message_type"], "dns_entries");
    assert_eq!(
        json["data"],
        serde_json::json!(["foo.example", "www.foo.example"])
    );
}

#[test]
fn normalization_is_idempotent_up_to_seen() {
    let leaf = build_cert(&CertSpec {
        sans: &["foo.example"],
        subject_c: Some("US"),
        with_key_usage: true,
        ..Default::default()
    });
    let raw = raw_x509_entry(3, leaf, Vec::new());

    let normalizer = example_normalizer();
    let mut first = normalizer.normalize(&raw).unwrap();
    let mut second = normalizer.normalize(&raw).unwrap();
    first.data.seen = 0.0;
    second.data.seen = 0.0;

    assert_eq!(first.to_json(), second.to_json());
}

#[test]
fn subject_st_comes_from_street_address_and_email_stays_null() {
    let leaf = build_cert(&CertSpec {
        subject_c: Some("US"),
        subject_street: Some("123 Example St"),
        subject_state: Some("California"),
        subject_email: Some("admin@foo.example"),
        ..Default::default()
    });
    let leaf_cert = leaf_cert_from_der(&leaf).unwrap();

    // ST carries the streetAddress RDN; stateOrProvince is not mapped
    assert_eq!(leaf_cert.subject.st.as_deref(), Some("123 Example St"));
    assert_eq!(
        leaf_cert.subject.aggregated.as_deref(),
        Some("/C=US/CN=foo.example/ST=123 Example St")
    );

    // The subject emailAddress RDN never populates email_address
    assert_eq!(leaf_cert.subject.email_address, None);

    let json: serde_json::Value = serde_json::to_value(&leaf_cert).unwrap();
    assert_eq!(json["subject"]["ST"], "123 Example St");
    assert_eq!(json["subject"]["email_address"], serde_json::Value::Null);
}

#[test]
fn subject_aggregation_and_key_usage() {
    let leaf = build_cert(&CertSpec {
        subject_c: Some("US"),
        with_key_usage: true,
        ..Default::default()
    });
    let leaf_cert = leaf_cert_from_der(&leaf).unwrap();

    assert_eq!(leaf_cert.subject.c.as_deref(), Some("US"));
    assert_eq!(
        leaf_cert.subject.aggregated.as_deref(),
        Some("/C=US/CN=foo.example")
    );
    // issuer has no country; CN is always part of the aggregation
    assert_eq!(leaf_cert.issuer.aggregated.as_deref(), Some("/CN=Example CA"));
    assert_eq!(
        leaf_cert.extensions.key_usage.as_deref(),
        Some("Digital Signature, Key Encipherment")
    );
    assert_eq!(
        leaf_cert.extensions.basic_constraints.as_deref(),
        Some("CA:FALSE")
    );
}
