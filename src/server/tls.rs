use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509NameBuilder, X509};

use crate::server::settings::TlsSettings;

const CERT_DIR_NAME: &str = "site-operator-certs";
const VALIDITY_DAYS: u32 = 365;

/// Certificate and key files to serve TLS with
#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Resolve the certificate to serve: the configured pair when both files are
/// given, otherwise a freshly generated self-signed one in the temp dir.
pub fn ensure_tls_files(settings: &TlsSettings) -> Result<TlsFiles> {
    if !settings.cert.is_empty() && !settings.key.is_empty() {
        return Ok(TlsFiles {
            cert: PathBuf::from(&settings.cert),
            key: PathBuf::from(&settings.key),
        });
    }

    tracing::info!("Generating self-signed TLS certificate");
    let dir = std::env::temp_dir().join(CERT_DIR_NAME);
    write_self_signed(&dir)
}

/// Generate a self-signed certificate and write `cert.pem` and `key.pem` into `dir`
pub fn write_self_signed(dir: &Path) -> Result<TlsFiles> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create certificate directory {}", dir.display()))?;

    let (cert_pem, key_pem) = self_signed_certificate()?;
    let files = TlsFiles {
        cert: dir.join("cert.pem"),
        key: dir.join("key.pem"),
    };

    fs::write(&files.cert, cert_pem)
        .with_context(|| format!("Failed to write {}", files.cert.display()))?;
    fs::write(&files.key, key_pem)
        .with_context(|| format!("Failed to write {}", files.key.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&files.key, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict {}", files.key.display()))?;
    }

    tracing::info!(cert = %files.cert.display(), key = %files.key.display(), "Wrote self-signed certificate");
    Ok(files)
}

/// P-256 key and a one year self-signed server certificate for local use,
/// as (certificate PEM, SEC1 "EC PRIVATE KEY" PEM)
pub fn self_signed_certificate() -> Result<(Vec<u8>, Vec<u8>)> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let ec_key = EcKey::generate(&group).context("Failed to generate EC key")?;
    let key_pem = ec_key.private_key_to_pem()?;
    let pkey = PKey::from_ec_key(ec_key)?;

    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    let serial = serial.to_asn1_integer()?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "site-operator")?;
    name.append_entry_by_nid(Nid::COMMONNAME, "localhost")?;
    let name = name.build();

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&pkey)?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(VALIDITY_DAYS)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    builder.append_extension(BasicConstraints::new().critical().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()?,
    )?;
    builder.append_extension(ExtendedKeyUsage::new().server_auth().build()?)?;
    let san = SubjectAlternativeName::new()
        .dns("localhost")
        .dns("*.localhost")
        .dns("host.docker.internal")
        .ip("127.0.0.1")
        .build(&builder.x509v3_context(None, None))?;
    builder.append_extension(san)?;

    builder.sign(&pkey, MessageDigest::sha256())?;
    let cert_pem = builder.build().to_pem()?;

    Ok((cert_pem, key_pem))
}
