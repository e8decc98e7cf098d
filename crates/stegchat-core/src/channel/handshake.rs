//! Unauthenticated finite field Diffie-Hellman key agreement.
//!
//! Wire sequence, every message a length-prefixed frame:
//! 1. server -> client: DH parameters, PEM `DH PARAMETERS` (PKCS#3 DER)
//! 2. both directions: the ephemeral public key, PEM `PUBLIC KEY` (SubjectPublicKeyInfo)
//!
//! The shared secret is left-padded to the byte length of the prime and stretched with
//! HKDF-SHA256 (no salt, info `handshake`) into a 32 byte AES key.
//!
//! # Note
//!
//! Nothing here authenticates the peer. A party in the middle can run one exchange
//! with each side and read everything; the checks below only reject parameters and
//! keys that are malformed or degenerate.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use log::debug;
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::channel::cipher::KEY_LEN;
use crate::channel::framing::{read_frame, write_frame};
use crate::error::StegchatError;
use crate::result::Result;

pub const HKDF_INFO: &[u8] = b"handshake";
pub const MIN_PRIME_BITS: u64 = 2048;
const PRIVATE_EXPONENT_BYTES: usize = 32;

const PARAMS_LABEL: &str = "DH PARAMETERS";
const PUBLIC_KEY_LABEL: &str = "PUBLIC KEY";

/// dhKeyAgreement, 1.2.840.113549.1.3.1
const DH_KEY_AGREEMENT_OID: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x03, 0x01];

/// RFC 3526 2048-bit MODP group (id 14), generator 2
const GROUP14_PRIME: [u8; 256] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc9, 0x0f, 0xda, 0xa2, 0x21, 0x68, 0xc2, 0x34,
    0xc4, 0xc6, 0x62, 0x8b, 0x80, 0xdc, 0x1c, 0xd1, 0x29, 0x02, 0x4e, 0x08, 0x8a, 0x67, 0xcc, 0x74,
    0x02, 0x0b, 0xbe, 0xa6, 0x3b, 0x13, 0x9b, 0x22, 0x51, 0x4a, 0x08, 0x79, 0x8e, 0x34, 0x04, 0xdd,
    0xef, 0x95, 0x19, 0xb3, 0xcd, 0x3a, 0x43, 0x1b, 0x30, 0x2b, 0x0a, 0x6d, 0xf2, 0x5f, 0x14, 0x37,
    0x4f, 0xe1, 0x35, 0x6d, 0x6d, 0x51, 0xc2, 0x45, 0xe4, 0x85, 0xb5, 0x76, 0x62, 0x5e, 0x7e, 0xc6,
    0xf4, 0x4c, 0x42, 0xe9, 0xa6, 0x37, 0xed, 0x6b, 0x0b, 0xff, 0x5c, 0xb6, 0xf4, 0x06, 0xb7, 0xed,
    0xee, 0x38, 0x6b, 0xfb, 0x5a, 0x89, 0x9f, 0xa5, 0xae, 0x9f, 0x24, 0x11, 0x7c, 0x4b, 0x1f, 0xe6,
    0x49, 0x28, 0x66, 0x51, 0xec, 0xe4, 0x5b, 0x3d, 0xc2, 0x00, 0x7c, 0xb8, 0xa1, 0x63, 0xbf, 0x05,
    0x98, 0xda, 0x48, 0x36, 0x1c, 0x55, 0xd3, 0x9a, 0x69, 0x16, 0x3f, 0xa8, 0xfd, 0x24, 0xcf, 0x5f,
    0x83, 0x65, 0x5d, 0x23, 0xdc, 0xa3, 0xad, 0x96, 0x1c, 0x62, 0xf3, 0x56, 0x20, 0x85, 0x52, 0xbb,
    0x9e, 0xd5, 0x29, 0x07, 0x70, 0x96, 0x96, 0x6d, 0x67, 0x0c, 0x35, 0x4e, 0x4a, 0xbc, 0x98, 0x04,
    0xf1, 0x74, 0x6c, 0x08, 0xca, 0x18, 0x21, 0x7c, 0x32, 0x90, 0x5e, 0x46, 0x2e, 0x36, 0xce, 0x3b,
    0xe3, 0x9e, 0x77, 0x2c, 0x18, 0x0e, 0x86, 0x03, 0x9b, 0x27, 0x83, 0xa2, 0xec, 0x07, 0xa2, 0x8f,
    0xb5, 0xc5, 0x5d, 0xf0, 0x6f, 0x4c, 0x52, 0xc9, 0xde, 0x2b, 0xcb, 0xf6, 0x95, 0x58, 0x17, 0x18,
    0x39, 0x95, 0x49, 0x7c, 0xea, 0x95, 0x6a, 0xe5, 0x15, 0xd2, 0x26, 0x18, 0x98, 0xfa, 0x05, 0x10,
    0x15, 0x72, 0x8e, 0x5a, 0x8a, 0xac, 0xaa, 0x68, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

/// Prime modulus and generator of a DH group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhParams {
    p: BigUint,
    g: BigUint,
}

impl Default for DhParams {
    fn default() -> Self {
        Self::rfc3526_group14()
    }
}

impl DhParams {
    pub fn rfc3526_group14() -> Self {
        Self {
            p: BigUint::from_bytes_be(&GROUP14_PRIME),
            g: BigUint::from(2u8),
        }
    }

    /// Accepts a group after the sanity checks: odd modulus of at least
    /// [`MIN_PRIME_BITS`] bits, generator in `2..=p-2`. Primality is not tested.
    pub fn new(p: BigUint, g: BigUint) -> Result<Self> {
        let params = Self { p, g };
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        let two = BigUint::from(2u8);
        if self.p.bits() < MIN_PRIME_BITS || !self.p.bit(0) {
            return Err(StegchatError::CryptoFailure(format!(
                "DH modulus of {} bits is not acceptable",
                self.p.bits()
            )));
        }
        if self.g < two || self.g > &self.p - &two {
            return Err(StegchatError::CryptoFailure(
                "DH generator out of range".to_string(),
            ));
        }
        Ok(())
    }

    pub fn prime(&self) -> &BigUint {
        &self.p
    }

    pub fn generator(&self) -> &BigUint {
        &self.g
    }

    /// byte length of the modulus, shared secrets are padded to it
    pub fn prime_len(&self) -> usize {
        self.p.bits().div_ceil(8) as usize
    }

    /// PKCS#3 `DHParameter ::= SEQUENCE { prime INTEGER, base INTEGER }`
    fn to_der(&self) -> Vec<u8> {
        let mut content = der::integer(&self.p);
        content.extend(der::integer(&self.g));
        der::tlv(der::SEQUENCE, &content)
    }

    fn from_der(bytes: &[u8]) -> Result<Self> {
        let mut outer = der::Reader::new(bytes);
        let mut seq = der::Reader::new(outer.read(der::SEQUENCE)?);
        let p = seq.read_integer()?;
        let g = seq.read_integer()?;
        // an optional privateValueLength may follow, it is not needed here
        Self::new(p, g)
    }

    pub fn to_pem(&self) -> String {
        pem::armor(PARAMS_LABEL, &self.to_der())
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Self::from_der(&pem::dearmor(PARAMS_LABEL, pem)?)
    }

    fn check_public(&self, y: &BigUint) -> Result<()> {
        let one = BigUint::from(1u8);
        if *y <= one || *y >= &self.p - &one {
            return Err(StegchatError::CryptoFailure(
                "peer public key out of range".to_string(),
            ));
        }
        Ok(())
    }
}

/// An ephemeral key pair, the private exponent is wiped on drop
pub struct DhKeyPair {
    params: DhParams,
    private: Zeroizing<Vec<u8>>,
    public: BigUint,
}

impl DhKeyPair {
    pub fn generate(params: &DhParams) -> Self {
        let mut private = Zeroizing::new(vec![0u8; PRIVATE_EXPONENT_BYTES]);
        loop {
            OsRng.fill_bytes(&mut private);
            // exponents 0 and 1 would leak the secret
            if private[..PRIVATE_EXPONENT_BYTES - 1].iter().any(|&b| b != 0)
                || private[PRIVATE_EXPONENT_BYTES - 1] > 1
            {
                break;
            }
        }

        let public = params.g.modpow(&BigUint::from_bytes_be(&private), &params.p);
        Self {
            params: params.clone(),
            private,
            public,
        }
    }

    pub fn params(&self) -> &DhParams {
        &self.params
    }

    pub fn public(&self) -> &BigUint {
        &self.public
    }

    /// `SubjectPublicKeyInfo` carrying the group and `y`
    pub fn public_to_pem(&self) -> String {
        let mut algorithm = der::tlv(der::OBJECT_IDENTIFIER, DH_KEY_AGREEMENT_OID);
        algorithm.extend(self.params.to_der());

        let mut key_bits = vec![0u8];
        key_bits.extend(der::integer(&self.public));

        let mut spki = der::tlv(der::SEQUENCE, &algorithm);
        spki.extend(der::tlv(der::BIT_STRING, &key_bits));
        pem::armor(PUBLIC_KEY_LABEL, &der::tlv(der::SEQUENCE, &spki))
    }

    /// Parses a peer's public key. It must be in the same group as `params` and in
    /// the range `1 < y < p-1`.
    pub fn public_from_pem(pem: &str, params: &DhParams) -> Result<BigUint> {
        let bytes = pem::dearmor(PUBLIC_KEY_LABEL, pem)?;
        let mut outer = der::Reader::new(&bytes);
        let mut spki = der::Reader::new(outer.read(der::SEQUENCE)?);

        let mut algorithm = der::Reader::new(spki.read(der::SEQUENCE)?);
        if algorithm.read(der::OBJECT_IDENTIFIER)? != DH_KEY_AGREEMENT_OID {
            return Err(StegchatError::ProtocolViolation(
                "public key is not a DH key".to_string(),
            ));
        }
        let group = DhParams::from_der(algorithm.rest())?;
        if group != *params {
            return Err(StegchatError::CryptoFailure(
                "peer public key belongs to a different group".to_string(),
            ));
        }

        let key_bits = spki.read(der::BIT_STRING)?;
        let Some((0, key)) = key_bits.split_first() else {
            return Err(StegchatError::ProtocolViolation(
                "malformed public key bit string".to_string(),
            ));
        };
        let y = der::Reader::new(key).read_integer()?;
        params.check_public(&y)?;
        Ok(y)
    }

    /// `peer^x mod p`, big endian and left-padded to the length of the prime
    pub fn shared_secret(&self, peer: &BigUint) -> Result<Zeroizing<Vec<u8>>> {
        self.params.check_public(peer)?;

        let mut raw = peer
            .modpow(&BigUint::from_bytes_be(&self.private), &self.params.p)
            .to_bytes_be();
        let mut secret = Zeroizing::new(vec![0u8; self.params.prime_len()]);
        let offset = secret.len() - raw.len();
        secret[offset..].copy_from_slice(&raw);
        raw.zeroize();
        Ok(secret)
    }
}

/// HKDF-SHA256 without salt, info [`HKDF_INFO`]
pub fn derive_key(shared_secret: &[u8]) -> Result<[u8; KEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; KEY_LEN];
    hk.expand(HKDF_INFO, &mut key)
        .map_err(|_| StegchatError::CryptoFailure("key derivation failed".to_string()))?;
    Ok(key)
}

/// Sends `params`, then exchanges public keys. Returns the derived AES key.
pub fn server_handshake<S: Read + Write>(stream: &mut S, params: &DhParams) -> Result<[u8; KEY_LEN]> {
    write_frame(stream, params.to_pem().as_bytes())?;
    exchange(stream, params)
}

/// Receives the server's parameters, then exchanges public keys. Returns the derived AES key.
pub fn client_handshake<S: Read + Write>(stream: &mut S) -> Result<[u8; KEY_LEN]> {
    let params = DhParams::from_pem(&frame_text(read_frame(stream)?)?)?;
    debug!("received {} bit DH parameters", params.p.bits());
    exchange(stream, &params)
}

fn exchange<S: Read + Write>(stream: &mut S, params: &DhParams) -> Result<[u8; KEY_LEN]> {
    let keypair = DhKeyPair::generate(params);
    write_frame(stream, keypair.public_to_pem().as_bytes())?;

    let peer = DhKeyPair::public_from_pem(&frame_text(read_frame(stream)?)?, params)?;
    let secret = keypair.shared_secret(&peer)?;
    derive_key(&secret)
}

fn frame_text(frame: Vec<u8>) -> Result<String> {
    String::from_utf8(frame)
        .map_err(|_| StegchatError::ProtocolViolation("handshake frame is not PEM text".to_string()))
}

mod pem {
    use super::*;

    const LINE_LEN: usize = 64;

    pub fn armor(label: &str, der: &[u8]) -> String {
        let body = BASE64.encode(der);
        let mut pem = format!("-----BEGIN {label}-----\n");
        for line in body.as_bytes().chunks(LINE_LEN) {
            // base64 output is ASCII
            pem.push_str(&String::from_utf8_lossy(line));
            pem.push('\n');
        }
        pem.push_str(&format!("-----END {label}-----\n"));
        pem
    }

    pub fn dearmor(label: &str, pem: &str) -> Result<Vec<u8>> {
        let begin = format!("-----BEGIN {label}-----");
        let end = format!("-----END {label}-----");
        let missing = || StegchatError::ProtocolViolation(format!("expected a PEM {label} block"));

        let start = pem.find(&begin).ok_or_else(missing)? + begin.len();
        let stop = start + pem[start..].find(&end).ok_or_else(missing)?;
        let body: String = pem[start..stop]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        BASE64
            .decode(body)
            .map_err(|e| StegchatError::ProtocolViolation(format!("invalid PEM body: {e}")))
    }
}

/// The handful of DER constructs the key exchange needs
mod der {
    use super::*;

    pub const INTEGER: u8 = 0x02;
    pub const BIT_STRING: u8 = 0x03;
    pub const OBJECT_IDENTIFIER: u8 = 0x06;
    pub const SEQUENCE: u8 = 0x30;

    pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        let len = content.len();
        if len < 0x80 {
            out.push(len as u8);
        } else {
            let bytes = len.to_be_bytes();
            let skip = bytes.iter().take_while(|&&b| b == 0).count();
            out.push(0x80 | (bytes.len() - skip) as u8);
            out.extend_from_slice(&bytes[skip..]);
        }
        out.extend_from_slice(content);
        out
    }

    /// non-negative INTEGER, a leading zero keeps the sign bit clear
    pub fn integer(n: &BigUint) -> Vec<u8> {
        let mut bytes = n.to_bytes_be();
        if bytes[0] & 0x80 != 0 {
            bytes.insert(0, 0);
        }
        tlv(INTEGER, &bytes)
    }

    pub struct Reader<'a> {
        rest: &'a [u8],
    }

    impl<'a> Reader<'a> {
        pub fn new(bytes: &'a [u8]) -> Self {
            Self { rest: bytes }
        }

        pub fn rest(&self) -> &'a [u8] {
            self.rest
        }

        fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            if n > self.rest.len() {
                return Err(malformed("truncated element"));
            }
            let (head, tail) = self.rest.split_at(n);
            self.rest = tail;
            Ok(head)
        }

        /// content of the next element, which must carry `tag`
        pub fn read(&mut self, tag: u8) -> Result<&'a [u8]> {
            let header = self.take(2)?;
            if header[0] != tag {
                return Err(malformed(&format!(
                    "expected tag {tag:#04x}, found {:#04x}",
                    header[0]
                )));
            }

            let len = match header[1] {
                short if short < 0x80 => short as usize,
                long => {
                    let n = (long & 0x7f) as usize;
                    if n == 0 || n > 4 {
                        return Err(malformed("unsupported length encoding"));
                    }
                    self.take(n)?
                        .iter()
                        .fold(0usize, |len, &b| (len << 8) | b as usize)
                }
            };
            self.take(len)
        }

        pub fn read_integer(&mut self) -> Result<BigUint> {
            let content = self.read(INTEGER)?;
            match content.first() {
                None => Err(malformed("empty INTEGER")),
                Some(b) if b & 0x80 != 0 => Err(malformed("negative INTEGER")),
                Some(_) => Ok(BigUint::from_bytes_be(content)),
            }
        }
    }

    fn malformed(what: &str) -> StegchatError {
        StegchatError::ProtocolViolation(format!("malformed DER: {what}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::framing::read_frame_len;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    #[test]
    fn should_provide_the_rfc3526_group() {
        let params = DhParams::rfc3526_group14();

        assert_eq!(params.prime().bits(), 2048);
        assert_eq!(params.generator(), &BigUint::from(2u8));
        assert_eq!(params.prime_len(), 256);
        assert_eq!(DhParams::default(), params);
    }

    #[test]
    fn should_round_trip_parameters_through_pem() {
        let params = DhParams::rfc3526_group14();
        let pem = params.to_pem();

        assert!(pem.starts_with("-----BEGIN DH PARAMETERS-----\n"));
        assert!(pem.ends_with("-----END DH PARAMETERS-----\n"));
        assert!(pem.lines().all(|l| l.len() <= 64 || l.starts_with("-----")));
        assert_eq!(DhParams::from_pem(&pem).unwrap(), params);
    }

    #[test]
    fn should_encode_parameters_as_pkcs3() {
        let der = DhParams::rfc3526_group14().to_der();

        // SEQUENCE, long form length of two bytes
        assert_eq!(&der[..2], &[0x30, 0x82]);
        // INTEGER with 257 content bytes: leading zero for the set top bit
        assert_eq!(&der[4..9], &[0x02, 0x82, 0x01, 0x01, 0x00]);
        // generator
        assert_eq!(&der[der.len() - 3..], &[0x02, 0x01, 0x02]);
    }

    #[test]
    fn should_reject_weak_parameters() {
        let small = BigUint::from(23u8);
        assert!(matches!(
            DhParams::new(small, BigUint::from(2u8)),
            Err(StegchatError::CryptoFailure(_))
        ));

        let p = DhParams::rfc3526_group14().prime().clone();
        assert!(DhParams::new(p.clone(), BigUint::from(1u8)).is_err());
        assert!(DhParams::new(p.clone(), &p - 1u8).is_err());
        assert!(DhParams::new(&p + 1u8, BigUint::from(2u8)).is_err());
    }

    #[test]
    fn should_reject_garbage_pem() {
        assert!(matches!(
            DhParams::from_pem("not pem at all"),
            Err(StegchatError::ProtocolViolation(_))
        ));
        assert!(matches!(
            DhParams::from_pem("-----BEGIN DH PARAMETERS-----\n!!!\n-----END DH PARAMETERS-----\n"),
            Err(StegchatError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn should_reject_truncated_der_in_valid_armor() {
        let cases: [&[u8]; 4] = [
            &[],
            // sequence claiming 4 GiB of content
            &[0x30, 0x84, 0xff, 0xff, 0xff, 0xff, 0x02, 0x01, 0x05],
            // integer running past the end
            &[0x30, 0x03, 0x02, 0x10, 0x01],
            // length of length out of range
            &[0x30, 0x89, 0x01],
        ];
        for der in cases {
            let pem = pem::armor(PARAMS_LABEL, der);
            assert!(
                matches!(DhParams::from_pem(&pem), Err(StegchatError::ProtocolViolation(_))),
                "accepted {der:02x?}"
            );
        }
    }

    #[test]
    fn should_agree_on_a_shared_secret() {
        let params = DhParams::rfc3526_group14();
        let alice = DhKeyPair::generate(&params);
        let bob = DhKeyPair::generate(&params);

        let a = alice.shared_secret(bob.public()).unwrap();
        let b = bob.shared_secret(alice.public()).unwrap();

        assert_eq!(*a, *b);
        assert_eq!(a.len(), 256);
        assert_eq!(derive_key(&a).unwrap(), derive_key(&b).unwrap());
    }

    #[test]
    fn should_round_trip_public_keys_through_pem() {
        let params = DhParams::rfc3526_group14();
        let keypair = DhKeyPair::generate(&params);
        let pem = keypair.public_to_pem();

        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----\n"));
        assert_eq!(&DhKeyPair::public_from_pem(&pem, &params).unwrap(), keypair.public());
    }

    #[test]
    fn should_reject_degenerate_public_keys() {
        let params = DhParams::rfc3526_group14();
        let keypair = DhKeyPair::generate(&params);
        let p = params.prime().clone();

        for y in [BigUint::from(0u8), BigUint::from(1u8), &p - 1u8, p.clone()] {
            assert!(matches!(
                keypair.shared_secret(&y),
                Err(StegchatError::CryptoFailure(_))
            ));
        }
    }

    #[test]
    fn should_derive_32_byte_keys() {
        let a = derive_key(b"some shared secret").unwrap();
        let b = derive_key(b"another shared secret").unwrap();

        assert_eq!(a.len(), KEY_LEN);
        assert_ne!(a, b);
        assert_eq!(a, derive_key(b"some shared secret").unwrap());
    }

    #[test]
    fn should_derive_the_same_key_on_both_ends() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            client_handshake(&mut stream).unwrap()
        });
        let (mut stream, _) = listener.accept().unwrap();
        let server_key = server_handshake(&mut stream, &DhParams::default()).unwrap();
        let client_key = client.join().unwrap();

        assert_eq!(server_key, client_key);
    }

    #[test]
    fn should_frame_every_handshake_message() {
        let mut wire = Vec::new();
        write_frame(&mut wire, DhParams::default().to_pem().as_bytes()).unwrap();

        let mut reader = wire.as_slice();
        let len = read_frame_len(&mut reader).unwrap();
        assert_eq!(len, reader.len());
    }
}
