//! Self-signed TLS material for the Vault server listener.
//!
//! A throwaway CA signs one server certificate whose SANs cover the names
//! Vault is reached by: the in-cluster service names, and `localhost` /
//! `127.0.0.1` for the port-forward used during bootstrap.

use std::net::IpAddr;

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder, X509};

const KEY_BITS: u32 = 2048;
const VALIDITY_DAYS: u32 = 365;

/// PEM encoded certificate and private key.
#[derive(Clone)]
pub struct CertificatePem {
    pub cert_pem: String,
    pub key_pem: String,
}

impl std::fmt::Debug for CertificatePem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificatePem").finish_non_exhaustive()
    }
}

pub struct CertificateAuthority {
    cert: X509,
    key: PKey<Private>,
}

fn name(common_name: &str) -> Result<X509Name, ErrorStack> {
    let mut builder = X509NameBuilder::new()?;
    builder.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    Ok(builder.build())
}

fn new_key() -> Result<PKey<Private>, ErrorStack> {
    PKey::from_rsa(Rsa::generate(KEY_BITS)?)
}

fn base_builder(subject: &X509Name, key: &PKey<Private>) -> Result<X509Builder, ErrorStack> {
    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;

    let mut serial = BigNum::new()?;
    serial.rand(159, MsbOption::MAYBE_ZERO, false)?;
    let serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;

    builder.set_subject_name(subject)?;
    builder.set_pubkey(key)?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(VALIDITY_DAYS)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    Ok(builder)
}

fn pem_string(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

impl CertificateAuthority {
    pub fn new(common_name: &str) -> Result<Self, ErrorStack> {
        let key = new_key()?;
        let subject = name(common_name)?;

        let mut builder = base_builder(&subject, &key)?;
        builder.set_issuer_name(&subject)?;
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .digital_signature()
                .build()?,
        )?;
        let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
        builder.append_extension(ski)?;
        builder.sign(&key, MessageDigest::sha256())?;

        Ok(Self {
            cert: builder.build(),
            key,
        })
    }

    pub fn cert_pem(&self) -> Result<String, ErrorStack> {
        Ok(pem_string(self.cert.to_pem()?))
    }

    pub fn certificate(&self) -> &X509 {
        &self.cert
    }

    /// Issues a server certificate for `dns_names` and `ips`.
    pub fn issue_server_cert(
        &self,
        common_name: &str,
        dns_names: &[String],
        ips: &[IpAddr],
    ) -> Result<CertificatePem, ErrorStack> {
        let key = new_key()?;
        let subject = name(common_name)?;

        let mut builder = base_builder(&subject, &key)?;
        builder.set_issuer_name(self.cert.subject_name())?;
        builder.append_extension(BasicConstraints::new().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
        builder.append_extension(ExtendedKeyUsage::new().server_auth().client_auth().build()?)?;

        let mut san = SubjectAlternativeName::new();
        for dns in dns_names {
            san.dns(dns);
        }
        for ip in ips {
            san.ip(&ip.to_string());
        }
        let san = san.build(&builder.x509v3_context(Some(&self.cert), None))?;
        builder.append_extension(san)?;

        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .issuer(false)
            .build(&builder.x509v3_context(Some(&self.cert), None))?;
        builder.append_extension(aki)?;

        builder.sign(&self.key, MessageDigest::sha256())?;
        let cert = builder.build();

        Ok(CertificatePem {
            cert_pem: pem_string(cert.to_pem()?),
            key_pem: pem_string(key.private_key_to_pem_pkcs8()?),
        })
    }
}

/// DNS names of the Vault service of `release` in `namespace`.
pub fn vault_server_dns_names(release: &str, namespace: &str) -> Vec<String> {
    let service = format!("{}-vault", release);
    vec![
        service.clone(),
        format!("{}.{}", service, namespace),
        format!("{}.{}.svc", service, namespace),
        format!("{}.{}.svc.cluster.local", service, namespace),
        "localhost".to_string(),
    ]
}
