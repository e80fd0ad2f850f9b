//! Decoding of client certificates forwarded in HTTP headers.
//!
//! TLS-terminating reverse proxies forward the verified leaf certificate as
//! a URL-encoded PEM block in a header (nginx `$ssl_client_escaped_cert`
//! style). These helpers recover the DER bytes from that transport form.

use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Errors produced while decoding a forwarded certificate header.
#[derive(Debug, Error)]
pub enum PemError {
    #[error("invalid percent-encoding in header value")]
    PercentEncoding,

    #[error("header value is not a PEM certificate block")]
    NotPem,

    #[error("invalid base64 in PEM body: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Decodes a percent-encoded string into raw bytes.
pub fn percent_decode(input: &str) -> Result<Vec<u8>, PemError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = hex_val(*bytes.get(i + 1).ok_or(PemError::PercentEncoding)?)?;
                let lo = hex_val(*bytes.get(i + 2).ok_or(PemError::PercentEncoding)?)?;
                out.push(hi << 4 | lo);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn hex_val(b: u8) -> Result<u8, PemError> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(PemError::PercentEncoding),
    }
}

/// Extracts DER bytes from a PEM certificate block.
///
/// Accepts the full `-----BEGIN CERTIFICATE-----` envelope with any line
/// breaks (or none, as proxies that fold the block onto one line produce).
pub fn pem_to_der(pem: &str) -> Result<Vec<u8>, PemError> {
    let start = pem.find(PEM_BEGIN).ok_or(PemError::NotPem)?;
    let rest = &pem[start + PEM_BEGIN.len()..];
    let end = rest.find(PEM_END).ok_or(PemError::NotPem)?;

    let body: String = rest[..end]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    Ok(STANDARD.decode(body)?)
}

/// Decodes a URL-encoded PEM certificate header value into DER bytes.
pub fn decode_cert_header(value: &str) -> Result<Vec<u8>, PemError> {
    let decoded = percent_decode(value)?;
    let pem = String::from_utf8(decoded).map_err(|_| PemError::NotPem)?;
    pem_to_der(&pem)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pem_for(der: &[u8]) -> String {
        format!("{}\n{}\n{}", PEM_BEGIN, STANDARD.encode(der), PEM_END)
    }

    #[test]
    fn test_percent_decode_passthrough() {
        assert_eq!(percent_decode("abc123").unwrap(), b"abc123");
    }

    #[test]
    fn test_percent_decode_escapes() {
        assert_eq!(percent_decode("a%20b%0Ac").unwrap(), b"a b\nc");
    }

    #[test]
    fn test_percent_decode_rejects_truncated_escape() {
        assert!(percent_decode("abc%2").is_err());
        assert!(percent_decode("abc%zz").is_err());
    }

    #[test]
    fn test_pem_to_der_roundtrip() {
        let der = b"not-actually-asn1-but-opaque-bytes";
        assert_eq!(pem_to_der(&pem_for(der)).unwrap(), der);
    }

    #[test]
    fn test_pem_to_der_single_line() {
        let der = b"\x30\x82\x01\x0a";
        let pem = format!("{}{}{}", PEM_BEGIN, STANDARD.encode(der), PEM_END);
        assert_eq!(pem_to_der(&pem).unwrap(), der);
    }

    #[test]
    fn test_pem_to_der_rejects_non_pem() {
        assert!(pem_to_der("hello world").is_err());
    }

    #[test]
    fn test_decode_cert_header() {
        let der = b"fake-der-bytes";
        let pem = pem_for(der);
        let encoded: String = pem
            .chars()
            .map(|c| match c {
                '\n' => "%0A".to_string(),
                '+' => "%2B".to_string(),
                '/' => "%2F".to_string(),
                '=' => "%3D".to_string(),
                c => c.to_string(),
            })
            .collect();
        assert_eq!(decode_cert_header(&encoded).unwrap(), der);
    }
}
