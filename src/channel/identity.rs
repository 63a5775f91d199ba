//! Peer identity extraction.
//!
//! Parses the DER leaf certificate a peer presented during a verified mutual
//! TLS handshake and pulls out the fields peer-identity policies match on.

use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

/// Identity fields of a verified peer certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Subject Common Name (CN).
    pub common_name: Option<String>,

    /// First Organisational Unit (OU) in the subject.
    pub organizational_unit: Option<String>,

    /// Subject Alternative Name URI entries (e.g. SPIFFE IDs).
    pub san_uris: Vec<String>,

    /// Subject Alternative Name DNS entries.
    pub san_dns_names: Vec<String>,

    /// Label for logs: SPIFFE URI, else CN, else `<unknown>`.
    pub display_name: String,
}

impl PeerIdentity {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::config_with("failed to parse peer certificate", e.to_string()))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_owned);
        let organizational_unit = cert
            .subject()
            .iter_organizational_unit()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_owned);
        let (san_uris, san_dns_names) = subject_alt_names(&cert);
        let display_name = display_name(common_name.as_deref(), &san_uris);

        Ok(Self {
            common_name,
            organizational_unit,
            san_uris,
            san_dns_names,
            display_name,
        })
    }
}

fn subject_alt_names(cert: &X509Certificate<'_>) -> (Vec<String>, Vec<String>) {
    let mut uris = Vec::new();
    let mut dns_names = Vec::new();

    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            match name {
                GeneralName::URI(uri) => uris.push((*uri).to_owned()),
                GeneralName::DNSName(dns) => dns_names.push((*dns).to_owned()),
                _ => {}
            }
        }
    }

    (uris, dns_names)
}

fn display_name(cn: Option<&str>, san_uris: &[String]) -> String {
    san_uris
        .iter()
        .find(|u| u.starts_with("spiffe://"))
        .map(String::as_str)
        .or(cn)
        .unwrap_or("<unknown>")
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, Ia5String, KeyPair, SanType};

    fn make_cert_der(cn: &str, ou: Option<&str>, sans: &[SanType]) -> Vec<u8> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        if let Some(ou) = ou {
            dn.push(DnType::OrganizationalUnitName, ou);
        }
        params.distinguished_name = dn;
        params.subject_alt_names = sans.to_vec();

        let key_pair = KeyPair::generate().unwrap();
        params.self_signed(&key_pair).unwrap().der().to_vec()
    }

    fn dns_san(s: &str) -> SanType {
        SanType::DnsName(Ia5String::try_from(s).unwrap())
    }

    fn uri_san(s: &str) -> SanType {
        SanType::URI(Ia5String::try_from(s).unwrap())
    }

    #[test]
    fn extracts_cn_and_ou() {
        // GIVEN: a client cert for the inventory service
        let der = make_cert_der("inventory-svc", Some("catalog"), &[dns_san("inventory")]);
        // WHEN: parsing
        let id = PeerIdentity::from_der(&der).unwrap();
        // THEN: subject fields are present
        assert_eq!(id.common_name.as_deref(), Some("inventory-svc"));
        assert_eq!(id.organizational_unit.as_deref(), Some("catalog"));
        assert_eq!(id.display_name, "inventory-svc");
    }

    #[test]
    fn extracts_both_san_kinds() {
        let der = make_cert_der(
            "multi",
            None,
            &[
                uri_san("spiffe://shop.example/ns/catalog/sa/reader"),
                dns_san("reader.catalog.internal"),
            ],
        );
        let id = PeerIdentity::from_der(&der).unwrap();

        assert_eq!(id.san_uris, vec!["spiffe://shop.example/ns/catalog/sa/reader"]);
        assert_eq!(id.san_dns_names, vec!["reader.catalog.internal"]);
    }

    #[test]
    fn display_name_prefers_spiffe_uri() {
        let der = make_cert_der("cn-loses", None, &[uri_san("spiffe://shop.example/a")]);
        let id = PeerIdentity::from_der(&der).unwrap();
        assert_eq!(id.display_name, "spiffe://shop.example/a");
    }

    #[test]
    fn non_spiffe_uri_falls_back_to_cn() {
        let der = make_cert_der("fallback", None, &[uri_san("https://example.com/x")]);
        let id = PeerIdentity::from_der(&der).unwrap();
        assert_eq!(id.display_name, "fallback");
    }

    #[test]
    fn unknown_when_nothing_identifies_the_peer() {
        assert_eq!(display_name(None, &[]), "<unknown>");
    }

    #[test]
    fn garbage_der_is_rejected() {
        assert!(PeerIdentity::from_der(b"not a cert").is_err());
    }
}
