// Minimal DER builder for test certificates
//
// Produces structurally valid X.509 v3 certificates byte by byte so tests
// control every field exactly. Signatures are dummy bytes; nothing here
// verifies them.

pub struct CertSpec<'a> {
    pub serial: &'a [u8],
    pub subject_cn: &'a str,
    pub subject_c: Option<&'a str>,
    pub subject_street: Option<&'a str>,
    pub subject_state: Option<&'a str>,
    pub subject_email: Option<&'a str>,
    pub issuer_cn: &'a str,
    pub sans: &'a [&'a str],
    pub is_ca: bool,
    pub with_key_usage: bool,
    pub with_poison: bool,
    pub not_before: &'a str,
    pub not_after: &'a str,
}

impl Default for CertSpec<'_> {
    fn default() -> Self {
        Self {
            serial: &[0x01, 0x02, 0x03],
            subject_cn: "foo.example",
            subject_c: None,
            subject_street: None,
            subject_state: None,
            subject_email: None,
            issuer_cn: "Example CA",
            sans: &[],
            is_ca: false,
            with_key_usage: false,
            with_poison: false,
            // 1700000000 and 1800000000 as UTCTime
            not_before: "231114221320Z",
            not_after: "270115080000Z",
        }
    }
}

pub fn build_cert(spec: &CertSpec) -> Vec<u8> {
    let sig_alg = seq(&[oid(&[1, 2, 840, 113549, 1, 1, 11]), null()].concat());

    let mut tbs_content = Vec::new();
    // [0] EXPLICIT version v3
    tbs_content.extend(tlv(0xA0, &integer(&[0x02])));
    tbs_content.extend(integer(spec.serial));
    tbs_content.extend(sig_alg.clone());
    tbs_content.extend(name(&NameSpec {
        cn: spec.issuer_cn,
        ..Default::default()
    }));
    tbs_content.extend(seq(
        &[utc_time(spec.not_before), utc_time(spec.not_after)].concat(),
    ));
    tbs_content.extend(name(&NameSpec {
        cn: spec.subject_cn,
        country: spec.subject_c,
        street: spec.subject_street,
        state: spec.subject_state,
        email: spec.subject_email,
    }));
    tbs_content.extend(spki());
    tbs_content.extend(tlv(0xA3, &seq(&extensions(spec))));

    let tbs = seq(&tbs_content);
    let signature = bit_string(&[0xde, 0xad, 0xbe, 0xef]);

    seq(&[tbs, sig_alg, signature].concat())
}

fn extensions(spec: &CertSpec) -> Vec<u8> {
    let mut exts = Vec::new();

    if !spec.sans.is_empty() {
        let mut names = Vec::new();
        for san in spec.sans {
            names.extend(tlv(0x82, san.as_bytes()));
        }
        exts.extend(extension(&[2, 5, 29, 17], false, &seq(&names)));
    }

    let basic_constraints = if spec.is_ca {
        seq(&bool_true())
    } else {
        seq(&[])
    };
    exts.extend(extension(&[2, 5, 29, 19], spec.is_ca, &basic_constraints));

    if spec.with_key_usage {
        // digitalSignature + keyEncipherment
        exts.extend(extension(
            &[2, 5, 29, 15],
            true,
            &tlv(0x03, &[0x05, 0xA0]),
        ));
    }

    if spec.with_poison {
        exts.extend(extension(&[1, 3, 6, 1, 4, 1, 11129, 2, 4, 3], true, &null()));
    }

    exts
}

fn extension(ext_oid: &[u64], critical: bool, value: &[u8]) -> Vec<u8> {
    let mut content = oid(ext_oid);
    if critical {
        content.extend(bool_true());
    }
    content.extend(tlv(0x04, value));
    seq(&content)
}

#[derive(Default)]
struct NameSpec<'a> {
    cn: &'a str,
    country: Option<&'a str>,
    street: Option<&'a str>,
    state: Option<&'a str>,
    email: Option<&'a str>,
}

fn name(spec: &NameSpec) -> Vec<u8> {
    let mut rdns = Vec::new();
    if let Some(c) = spec.country {
        rdns.extend(set(&seq(
            &[oid(&[2, 5, 4, 6]), printable_string(c)].concat(),
        )));
    }
    // stateOrProvince (2.5.4.8) and streetAddress (2.5.4.9)
    if let Some(state) = spec.state {
        rdns.extend(set(&seq(
            &[oid(&[2, 5, 4, 8]), utf8_string(state)].concat(),
        )));
    }
    if let Some(street) = spec.street {
        rdns.extend(set(&seq(
            &[oid(&[2, 5, 4, 9]), utf8_string(street)].concat(),
        )));
    }
    rdns.extend(set(&seq(
        &[oid(&[2, 5, 4, 3]), utf8_string(spec.cn)].concat(),
    )));
    // emailAddress (1.2.840.113549.1.9.1), IA5String
    if let Some(email) = spec.email {
        rdns.extend(set(&seq(
            &[oid(&[1, 2, 840, 113549, 1, 9, 1]), ia5_string(email)].concat(),
        )));
    }
    seq(&rdns)
}

fn spki() -> Vec<u8> {
    let alg = seq(&[oid(&[1, 2, 840, 113549, 1, 1, 1]), null()].concat());
    let key = bit_string(&[0x00, 0x01, 0x02, 0x03]);
    seq(&[alg, key].concat())
}

fn der_len(len: usize) -> Vec<u8> {
    if len < 128 {
        vec![len as u8]
    } else if len < 256 {
        vec![0x81, len as u8]
    } else {
        vec![0x82, (len >> 8) as u8, len as u8]
    }
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(der_len(content.len()));
    out.extend_from_slice(content);
    out
}

fn seq(content: &[u8]) -> Vec<u8> {
    tlv(0x30, content)
}

fn set(content: &[u8]) -> Vec<u8> {
    tlv(0x31, content)
}

fn integer(bytes: &[u8]) -> Vec<u8> {
    tlv(0x02, bytes)
}

fn null() -> Vec<u8> {
    vec![0x05, 0x00]
}

fn bool_true() -> Vec<u8> {
    vec![0x01, 0x01, 0xFF]
}

fn bit_string(data: &[u8]) -> Vec<u8> {
    let mut content = vec![0x00];
    content.extend_from_slice(data);
    tlv(0x03, &content)
}

fn printable_string(value: &str) -> Vec<u8> {
    tlv(0x13, value.as_bytes())
}

fn utf8_string(value: &str) -> Vec<u8> {
    tlv(0x0C, value.as_bytes())
}

fn ia5_string(value: &str) -> Vec<u8> {
    tlv(0x16, value.as_bytes())
}

fn utc_time(value: &str) -> Vec<u8> {
    tlv(0x17, value.as_bytes())
}

fn base128(mut value: u64) -> Vec<u8> {
    if value == 0 {
        return vec![0];
    }
    let mut groups = Vec::new();
    while value > 0 {
        groups.push((value & 0x7F) as u8);
        value >>= 7;
    }
    groups.reverse();
    let last = groups.len() - 1;
    groups
        .iter()
        .enumerate()
        .map(|(i, b)| if i == last { *b } else { b | 0x80 })
        .collect()
}

fn oid(arcs: &[u64]) -> Vec<u8> {
    let mut body = vec![(arcs[0] * 40 + arcs[1]) as u8];
    for &arc in &arcs[2..] {
        body.extend(base128(arc));
    }
    tlv(0x06, &body)
}
