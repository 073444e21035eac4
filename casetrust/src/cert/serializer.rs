// Certificate binary encoder / decoder.
//
// Every field is an element `[tag:1B][len:2B LE][value:lenB]`, in this order:
//
//   0x01 serial           1..=20 bytes
//   0x02 sig algorithm    1 byte (0x01 = Ed25519)
//   0x03 issuer DN        nested attribute elements
//   0x04 not_before       u64 LE
//   0x05 not_after        u64 LE, 0 = no expiration
//   0x06 subject DN       nested attribute elements
//   0x07 public key       32 bytes
//   0x08 extensions       nested elements, ascending tag, each at most once
//   0x09 signature        64 bytes, Ed25519 over SHA-256(all preceding bytes)
//
// Extensions:
//   0x01 basic constraints  [is_ca:1B][path_len:1B optional]
//   0x02 key usage          u16 LE
//   0x03 key purposes       one byte per purpose id (1..=6)
//   0x04 subject key id     20 bytes
//   0x05 authority key id   20 bytes
//   0x06 future extension   [critical:1B][opaque]

use bytes::{BufMut, Bytes, BytesMut};

use crate::cert::{
    CertFlags, Certificate, DistinguishedName, KeyPurposes, KeyUsage, SignatureAlgorithm,
    MAX_SERIAL_LEN,
};
use crate::crypto::keys::{KeyId, KEY_ID_LEN, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use crate::error::{CaseTrustError, Result};

pub(crate) const TAG_SERIAL: u8 = 0x01;
pub(crate) const TAG_SIGNATURE_ALGORITHM: u8 = 0x02;
pub(crate) const TAG_ISSUER: u8 = 0x03;
pub(crate) const TAG_NOT_BEFORE: u8 = 0x04;
pub(crate) const TAG_NOT_AFTER: u8 = 0x05;
pub(crate) const TAG_SUBJECT: u8 = 0x06;
pub(crate) const TAG_PUBLIC_KEY: u8 = 0x07;
pub(crate) const TAG_EXTENSIONS: u8 = 0x08;
pub(crate) const TAG_SIGNATURE: u8 = 0x09;

const EXT_BASIC_CONSTRAINTS: u8 = 0x01;
const EXT_KEY_USAGE: u8 = 0x02;
const EXT_KEY_PURPOSES: u8 = 0x03;
const EXT_SUBJECT_KEY_ID: u8 = 0x04;
const EXT_AUTHORITY_KEY_ID: u8 = 0x05;
const EXT_FUTURE: u8 = 0x06;

/// Element header: tag + length.
const ELEMENT_HEADER_LEN: usize = 3;

// ── Element codec ────────────────────────────────────────────────────────

/// Append one element.
pub(crate) fn put_element(buf: &mut BytesMut, tag: u8, value: &[u8]) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        CaseTrustError::CertificateBuild(format!(
            "element 0x{tag:02x} is {} bytes, limit is {}",
            value.len(),
            u16::MAX
        ))
    })?;
    buf.reserve(ELEMENT_HEADER_LEN + value.len());
    buf.put_u8(tag);
    buf.put_u16_le(len);
    buf.put_slice(value);
    Ok(())
}

/// Read one element from the front of `data`, advancing it.
pub(crate) fn read_element<'a>(data: &mut &'a [u8]) -> Result<(u8, &'a [u8])> {
    if data.len() < ELEMENT_HEADER_LEN {
        return Err(CaseTrustError::UnsupportedFormat("unexpected end of data".into()));
    }
    let tag = data[0];
    let len = u16::from_le_bytes([data[1], data[2]]) as usize;
    let rest = &data[ELEMENT_HEADER_LEN..];
    if rest.len() < len {
        return Err(CaseTrustError::UnsupportedFormat("unexpected end of data".into()));
    }
    let (value, tail) = rest.split_at(len);
    *data = tail;
    Ok((tag, value))
}

fn expect_element<'a>(data: &mut &'a [u8], tag: u8) -> Result<&'a [u8]> {
    let (found, value) = read_element(data)?;
    if found != tag {
        return Err(CaseTrustError::UnsupportedFormat(format!(
            "expected element 0x{tag:02x}, found 0x{found:02x}"
        )));
    }
    Ok(value)
}

fn fixed<const N: usize>(value: &[u8], what: &str) -> Result<[u8; N]> {
    value.try_into().map_err(|_| {
        CaseTrustError::UnsupportedFormat(format!(
            "{what} must be {N} bytes, got {}",
            value.len()
        ))
    })
}

// ── Extensions ───────────────────────────────────────────────────────────

/// Decoded (or to-be-encoded) extension set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Extensions {
    /// `(is_ca, path_len)`.
    pub basic_constraints: Option<(bool, Option<u8>)>,
    pub key_usage: Option<KeyUsage>,
    pub key_purposes: Option<KeyPurposes>,
    pub subject_key_id: Option<KeyId>,
    pub authority_key_id: Option<KeyId>,
    /// `(critical, opaque body)`.
    pub future: Option<(bool, Vec<u8>)>,
}

impl Extensions {
    fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(64);
        if let Some((is_ca, path_len)) = self.basic_constraints {
            let mut v = vec![u8::from(is_ca)];
            v.extend(path_len);
            put_element(&mut buf, EXT_BASIC_CONSTRAINTS, &v)?;
        }
        if let Some(usage) = self.key_usage {
            put_element(&mut buf, EXT_KEY_USAGE, &usage.0.to_le_bytes())?;
        }
        if let Some(purposes) = self.key_purposes {
            let ids: Vec<u8> = purposes.ids().collect();
            put_element(&mut buf, EXT_KEY_PURPOSES, &ids)?;
        }
        if let Some(skid) = &self.subject_key_id {
            put_element(&mut buf, EXT_SUBJECT_KEY_ID, skid)?;
        }
        if let Some(akid) = &self.authority_key_id {
            put_element(&mut buf, EXT_AUTHORITY_KEY_ID, akid)?;
        }
        if let Some((critical, body)) = &self.future {
            let mut v = Vec::with_capacity(1 + body.len());
            v.push(u8::from(*critical));
            v.extend_from_slice(body);
            put_element(&mut buf, EXT_FUTURE, &v)?;
        }
        Ok(buf)
    }

    fn decode(mut data: &[u8]) -> Result<Self> {
        let mut ext = Extensions::default();
        let mut last_tag = 0u8;

        while !data.is_empty() {
            let (tag, value) = read_element(&mut data)?;
            if tag <= last_tag {
                return Err(CaseTrustError::UnsupportedFormat(format!(
                    "extension 0x{tag:02x} out of order or repeated"
                )));
            }
            last_tag = tag;

            match tag {
                EXT_BASIC_CONSTRAINTS => {
                    let (is_ca, path_len) = match value {
                        [ca] => (decode_bool(*ca)?, None),
                        [ca, len] => (decode_bool(*ca)?, Some(*len)),
                        _ => {
                            return Err(CaseTrustError::UnsupportedFormat(
                                "basic constraints must be 1 or 2 bytes".into(),
                            ))
                        }
                    };
                    if path_len.is_some() && !is_ca {
                        return Err(CaseTrustError::UnsupportedFormat(
                            "path length constraint on a non-CA certificate".into(),
                        ));
                    }
                    ext.basic_constraints = Some((is_ca, path_len));
                }
                EXT_KEY_USAGE => {
                    ext.key_usage = Some(KeyUsage(u16::from_le_bytes(fixed(value, "key usage")?)));
                }
                EXT_KEY_PURPOSES => {
                    let mut purposes = KeyPurposes::NONE;
                    for id in value {
                        let p = KeyPurposes::from_id(*id).ok_or_else(|| {
                            let detail = format!("unknown key purpose id {id}");
                            CaseTrustError::UnsupportedFormat(detail)
                        })?;
                        purposes = purposes | p;
                    }
                    ext.key_purposes = Some(purposes);
                }
                EXT_SUBJECT_KEY_ID => {
                    ext.subject_key_id = Some(fixed::<KEY_ID_LEN>(value, "subject key id")?);
                }
                EXT_AUTHORITY_KEY_ID => {
                    ext.authority_key_id = Some(fixed::<KEY_ID_LEN>(value, "authority key id")?);
                }
                EXT_FUTURE => {
                    let (critical, body) = value.split_first().ok_or_else(|| {
                        CaseTrustError::UnsupportedFormat("empty future extension".into())
                    })?;
                    ext.future = Some((decode_bool(*critical)?, body.to_vec()));
                }
                other => {
                    return Err(CaseTrustError::UnsupportedFormat(format!(
                        "unknown extension 0x{other:02x}"
                    )))
                }
            }
        }
        Ok(ext)
    }
}

fn decode_bool(b: u8) -> Result<bool> {
    match b {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(CaseTrustError::UnsupportedFormat(format!(
            "boolean byte 0x{other:02x}"
        ))),
    }
}

// ── Certificate ──────────────────────────────────────────────────────────

/// The signed portion of a certificate, ready to encode.
pub(crate) struct TbsCertificate<'a> {
    pub serial: &'a [u8],
    pub signature_algorithm: u8,
    pub issuer: &'a DistinguishedName,
    pub not_before: u64,
    pub not_after: u64,
    pub subject: &'a DistinguishedName,
    pub public_key: &'a [u8; PUBLIC_KEY_LEN],
    pub extensions: &'a Extensions,
}

impl TbsCertificate<'_> {
    /// Encode every element preceding the signature.
    pub(crate) fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(256);
        put_element(&mut buf, TAG_SERIAL, self.serial)?;
        put_element(&mut buf, TAG_SIGNATURE_ALGORITHM, &[self.signature_algorithm])?;

        let mut dn = BytesMut::new();
        self.issuer.encode(&mut dn)?;
        put_element(&mut buf, TAG_ISSUER, &dn)?;

        put_element(&mut buf, TAG_NOT_BEFORE, &self.not_before.to_le_bytes())?;
        put_element(&mut buf, TAG_NOT_AFTER, &self.not_after.to_le_bytes())?;

        dn.clear();
        self.subject.encode(&mut dn)?;
        put_element(&mut buf, TAG_SUBJECT, &dn)?;

        put_element(&mut buf, TAG_PUBLIC_KEY, self.public_key)?;
        put_element(&mut buf, TAG_EXTENSIONS, &self.extensions.encode()?)?;
        Ok(buf)
    }
}

/// Append the signature element, completing the encoding.
pub(crate) fn finish(mut tbs: BytesMut, signature: &[u8; SIGNATURE_LEN]) -> Result<Bytes> {
    put_element(&mut tbs, TAG_SIGNATURE, signature)?;
    Ok(tbs.freeze())
}

/// Decode a certificate. The returned value shares `encoded`'s buffer.
pub fn decode(encoded: Bytes) -> Result<Certificate> {
    let mut data: &[u8] = &encoded;

    let serial = expect_element(&mut data, TAG_SERIAL)?;
    if serial.is_empty() || serial.len() > MAX_SERIAL_LEN {
        return Err(CaseTrustError::UnsupportedFormat(format!(
            "serial number length {} outside 1..={MAX_SERIAL_LEN}",
            serial.len()
        )));
    }
    let serial = encoded.slice_ref(serial);

    let alg = expect_element(&mut data, TAG_SIGNATURE_ALGORITHM)?;
    let [alg] = fixed::<1>(alg, "signature algorithm")?;
    let signature_algorithm = SignatureAlgorithm::try_from(alg)?;

    let issuer = DistinguishedName::decode(expect_element(&mut data, TAG_ISSUER)?)?;
    let not_before = expect_element(&mut data, TAG_NOT_BEFORE)?;
    let not_before = u64::from_le_bytes(fixed(not_before, "not_before")?);
    let not_after = expect_element(&mut data, TAG_NOT_AFTER)?;
    let not_after = u64::from_le_bytes(fixed(not_after, "not_after")?);
    let subject = DistinguishedName::decode(expect_element(&mut data, TAG_SUBJECT)?)?;
    let public_key = expect_element(&mut data, TAG_PUBLIC_KEY)?;
    let public_key = fixed::<PUBLIC_KEY_LEN>(public_key, "public key")?;
    let ext = Extensions::decode(expect_element(&mut data, TAG_EXTENSIONS)?)?;

    let tbs_len = encoded.len() - data.len();
    let signature = fixed::<SIGNATURE_LEN>(expect_element(&mut data, TAG_SIGNATURE)?, "signature")?;
    if !data.is_empty() {
        return Err(CaseTrustError::UnsupportedFormat(format!(
            "{} trailing bytes after signature",
            data.len()
        )));
    }

    let subject_key_id = ext.subject_key_id.ok_or_else(|| {
        CaseTrustError::UnsupportedFormat("missing subject key id extension".into())
    })?;
    let authority_key_id = ext.authority_key_id.ok_or_else(|| {
        CaseTrustError::UnsupportedFormat("missing authority key id extension".into())
    })?;

    let mut flags = CertFlags::NONE;
    let mut path_len_constraint = 0;
    if let Some((is_ca, path_len)) = ext.basic_constraints {
        flags.insert(CertFlags::BASIC_CONSTRAINTS);
        if is_ca {
            flags.insert(CertFlags::IS_CA);
        }
        if let Some(len) = path_len {
            flags.insert(CertFlags::PATH_LEN_CONSTRAINT);
            path_len_constraint = len;
        }
    }
    if matches!(ext.future, Some((true, _))) {
        flags.insert(CertFlags::FUTURE_EXT_CRITICAL);
    }

    Ok(Certificate {
        encoded,
        tbs_len,
        serial,
        signature_algorithm,
        issuer,
        subject,
        not_before,
        not_after,
        public_key,
        subject_key_id,
        authority_key_id,
        key_usage: ext.key_usage.unwrap_or_default(),
        key_purposes: ext.key_purposes.unwrap_or_default(),
        path_len_constraint,
        flags,
        signature,
        tbs_hash: None,
    })
}
