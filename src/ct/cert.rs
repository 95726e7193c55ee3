//! X.509 field extraction and derived-column computation.
//!
//! Certificate parsing here is best-effort: a leaf whose DER body will
//! not parse still flows through ingestion (with an error_log entry), it
//! just yields no domains and empty derived fields.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use x509_parser::prelude::*;

use super::leaf::EntryBody;

/// State and territory second-level zones used for the jurisdiction column.
const JURISDICTIONS: [(&str, &str); 8] = [
    ("TAS", "tas.gov.au"),
    ("VIC", "vic.gov.au"),
    ("NSW", "nsw.gov.au"),
    ("QLD", "qld.gov.au"),
    ("WA", "wa.gov.au"),
    ("SA", "sa.gov.au"),
    ("NT", "nt.gov.au"),
    ("ACT", "act.gov.au"),
];

/// Subject CN fragments that identify a fronting CDN.
const CDNS: [(&str, &str); 4] = [
    ("cloudflaressl", "CloudFlare"),
    ("incapsula", "Incapsula"),
    ("fastly", "Fastly"),
    ("pantheonsite", "PantheonSite"),
];

const UNRECOGNIZED_CDN: &str = "NOT RECOGNIZED CDN";
const MIXED: &str = "MIXED";
const OTHER: &str = "OTHER";

/// Fields pulled out of a parsed certificate or precert TBS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub issuer_cn: String,
    pub subject_cn: String,
    pub dns_names: Vec<String>,
}

/// The derived columns written to cert_store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedFields {
    pub not_valid_before: Option<DateTime<Utc>>,
    pub not_valid_after: Option<DateTime<Utc>>,
    pub issuer_cn: String,
    pub jurisdiction: String,
    pub cdn: String,
}

/// Parse the certificate carried by a leaf. Returns `None` when the DER
/// body does not parse; callers log and move on.
pub fn parse_entry_certificate(body: &EntryBody) -> Option<CertInfo> {
    match body {
        EntryBody::X509 { cert } => {
            let (_, cert) = X509Certificate::from_der(cert).ok()?;
            Some(info_from_tbs(&cert.tbs_certificate))
        }
        EntryBody::Precert { tbs, .. } => {
            let (_, tbs) = TbsCertificate::from_der(tbs).ok()?;
            Some(info_from_tbs(&tbs))
        }
    }
}

fn info_from_tbs(tbs: &TbsCertificate<'_>) -> CertInfo {
    let dns_names = tbs
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|san| {
            san.value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    CertInfo {
        not_before: timestamp_utc(&tbs.validity.not_before),
        not_after: timestamp_utc(&tbs.validity.not_after),
        issuer_cn: first_common_name(&tbs.issuer),
        subject_cn: first_common_name(&tbs.subject),
        dns_names,
    }
}

fn first_common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or("")
        .to_string()
}

fn timestamp_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(time.to_datetime().unix_timestamp(), 0)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Compute the derived columns for a (possibly unparseable) certificate.
pub fn derive_fields(cert: Option<&CertInfo>) -> DerivedFields {
    match cert {
        Some(cert) => DerivedFields {
            not_valid_before: Some(cert.not_before),
            not_valid_after: Some(cert.not_after),
            issuer_cn: cert.issuer_cn.clone(),
            jurisdiction: jurisdiction_for(&cert.dns_names),
            cdn: cdn_for(&cert.subject_cn),
        },
        None => DerivedFields {
            not_valid_before: None,
            not_valid_after: None,
            issuer_cn: String::new(),
            jurisdiction: OTHER.to_string(),
            cdn: UNRECOGNIZED_CDN.to_string(),
        },
    }
}

/// Classify the jurisdiction from SAN dNSNames: no code seen is `OTHER`,
/// exactly one distinct code is that code, more than one is `MIXED`.
pub fn jurisdiction_for<S: AsRef<str>>(dns_names: &[S]) -> String {
    let mut jurisdiction: Option<&str> = None;
    for name in dns_names {
        let name = name.as_ref();
        for (code, zone) in JURISDICTIONS {
            if name == zone || name.ends_with(&format!(".{zone}")) {
                jurisdiction = match jurisdiction {
                    None => Some(code),
                    Some(seen) if seen == code => jurisdiction,
                    Some(_) => Some(MIXED),
                };
            }
        }
    }
    jurisdiction.unwrap_or(OTHER).to_string()
}

/// Classify the fronting CDN from fragments of the subject common name.
pub fn cdn_for(subject_cn: &str) -> String {
    let mut cdn: Option<&str> = None;
    for (fragment, name) in CDNS {
        if subject_cn.contains(fragment) {
            cdn = match cdn {
                None => Some(name),
                Some(_) => Some(MIXED),
            };
        }
    }
    cdn.unwrap_or(UNRECOGNIZED_CDN).to_string()
}

/// The watched domains a certificate covers: subject CN plus SAN
/// dNSNames, kept when they end in the suffix or equal the apex.
/// Deduplicated and ordered for deterministic fan-out.
pub fn watched_domains(cert: &CertInfo, suffix: &str, apex: &str) -> BTreeSet<String> {
    let mut domains = BTreeSet::new();

    if matches_watch(&cert.subject_cn, suffix, apex) {
        domains.insert(cert.subject_cn.clone());
    }
    for name in &cert.dns_names {
        if matches_watch(name, suffix, apex) {
            domains.insert(name.clone());
        }
    }

    domains
}

fn matches_watch(domain: &str, suffix: &str, apex: &str) -> bool {
    domain.ends_with(suffix) || domain == apex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jurisdiction_other_when_no_code_matches() {
        assert_eq!(jurisdiction_for(&["www.gov.au", "example.com"]), "OTHER");
        assert_eq!(jurisdiction_for::<&str>(&[]), "OTHER");
    }

    #[test]
    fn jurisdiction_single_code() {
        assert_eq!(jurisdiction_for(&["www.health.nsw.gov.au"]), "NSW");
        assert_eq!(jurisdiction_for(&["vic.gov.au"]), "VIC");
    }

    #[test]
    fn jurisdiction_repeated_code_stays_single() {
        assert_eq!(
            jurisdiction_for(&["a.nsw.gov.au", "b.nsw.gov.au", "nsw.gov.au"]),
            "NSW"
        );
    }

    #[test]
    fn jurisdiction_mixed_codes() {
        assert_eq!(jurisdiction_for(&["a.nsw.gov.au", "b.vic.gov.au"]), "MIXED");
    }

    #[test]
    fn jurisdiction_requires_label_boundary() {
        // "notnsw.gov.au" is not under nsw.gov.au.
        assert_eq!(jurisdiction_for(&["notnsw.gov.au"]), "OTHER");
    }

    #[test]
    fn cdn_unrecognized_by_default() {
        assert_eq!(cdn_for("www.example.gov.au"), "NOT RECOGNIZED CDN");
        assert_eq!(cdn_for(""), "NOT RECOGNIZED CDN");
    }

    #[test]
    fn cdn_single_match() {
        assert_eq!(cdn_for("sni12345.cloudflaressl.com"), "CloudFlare");
        assert_eq!(cdn_for("x.pantheonsite.io"), "PantheonSite");
    }

    #[test]
    fn cdn_multiple_fragments_is_mixed() {
        assert_eq!(cdn_for("cloudflaressl-and-fastly"), "MIXED");
    }

    #[test]
    fn derive_fields_for_unparseable_cert() {
        let fields = derive_fields(None);
        assert_eq!(fields.not_valid_before, None);
        assert_eq!(fields.not_valid_after, None);
        assert_eq!(fields.issuer_cn, "");
        assert_eq!(fields.jurisdiction, "OTHER");
        assert_eq!(fields.cdn, "NOT RECOGNIZED CDN");
    }

    #[test]
    fn derive_fields_classifies_parsed_cert() {
        let cert = CertInfo {
            not_before: DateTime::<Utc>::UNIX_EPOCH,
            not_after: DateTime::<Utc>::UNIX_EPOCH,
            issuer_cn: "Example CA".to_string(),
            subject_cn: "ssl.incapsula.example".to_string(),
            dns_names: vec!["portal.act.gov.au".to_string()],
        };
        let fields = derive_fields(Some(&cert));
        assert_eq!(fields.issuer_cn, "Example CA");
        assert_eq!(fields.jurisdiction, "ACT");
        assert_eq!(fields.cdn, "Incapsula");
        assert!(fields.not_valid_before.is_some());
    }

    #[test]
    fn parse_entry_certificate_tolerates_garbage() {
        let body = EntryBody::X509 {
            cert: b"garbage".to_vec(),
        };
        assert!(parse_entry_certificate(&body).is_none());

        let body = EntryBody::Precert {
            issuer_key_hash: [0; 32],
            tbs: b"garbage".to_vec(),
        };
        assert!(parse_entry_certificate(&body).is_none());
    }

    fn cert_with(subject_cn: &str, dns_names: &[&str]) -> CertInfo {
        CertInfo {
            not_before: DateTime::<Utc>::UNIX_EPOCH,
            not_after: DateTime::<Utc>::UNIX_EPOCH,
            issuer_cn: String::new(),
            subject_cn: subject_cn.to_string(),
            dns_names: dns_names.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn watched_domains_filters_by_suffix_and_apex() {
        let cert = cert_with(
            "www.example.gov.au",
            &["www.example.gov.au", "gov.au", "example.com", "nogov.au"],
        );
        let domains = watched_domains(&cert, ".gov.au", "gov.au");
        let expected: Vec<&str> = vec!["gov.au", "www.example.gov.au"];
        assert_eq!(domains.iter().map(String::as_str).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn watched_domains_empty_when_nothing_matches() {
        let cert = cert_with("www.example.com", &["example.com"]);
        assert!(watched_domains(&cert, ".gov.au", "gov.au").is_empty());
    }

    #[test]
    fn watched_domains_dedupes_cn_and_san() {
        let cert = cert_with("www.example.gov.au", &["www.example.gov.au"]);
        assert_eq!(watched_domains(&cert, ".gov.au", "gov.au").len(), 1);
    }
}
