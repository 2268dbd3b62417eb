//! Finite-field Diffie-Hellman over a relay-supplied modulus
//!
//! The relay picks one modulus at startup and hands its raw big-endian bytes
//! to every endpoint. Each endpoint generates one keypair from it and
//! publishes the public value through the relay; pairwise keys are derived
//! locally and never transmitted.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use num_bigint::{BigUint, RandBigInt};
use zeroize::ZeroizeOnDrop;

use super::error::{CryptoError, CryptoResult};
use super::hash::{Hash, HashOutput};

/// Generator shared by every group
pub const GENERATOR: u32 = 2;

/// Shortest modulus an endpoint accepts
pub const MIN_MODULUS_BITS: u64 = 512;

/// Size of the private exponent
pub const PRIVATE_EXPONENT_BITS: u64 = 256;

/// RFC 2409 Oakley group 2
const MODP_1024: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381",
    "FFFFFFFFFFFFFFFF",
);

/// RFC 3526 group 14
const MODP_2048: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

/// Well-known MODP groups the relay can serve
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Group {
    /// 1024-bit Oakley group 2
    Modp1024,
    /// 2048-bit MODP group 14
    #[default]
    Modp2048,
}

impl Group {
    /// Canonical name, as accepted by `FromStr`
    pub fn name(self) -> &'static str {
        match self {
            Group::Modp1024 => "modp1024",
            Group::Modp2048 => "modp2048",
        }
    }

    /// The group's prime
    pub fn modulus(self) -> Modulus {
        let hex_prime = match self {
            Group::Modp1024 => MODP_1024,
            Group::Modp2048 => MODP_2048,
        };
        // The constants are valid hex; parse_bytes only fails on bad digits.
        let prime = BigUint::parse_bytes(hex_prime.as_bytes(), 16).unwrap_or_default();
        let bytes = prime.to_bytes_be();
        Modulus { prime, bytes }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Group {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "modp1024" => Ok(Group::Modp1024),
            "modp2048" => Ok(Group::Modp2048),
            other => Err(CryptoError::InvalidModulus(format!("unknown group {other}"))),
        }
    }
}

/// A public Diffie-Hellman modulus
#[derive(Clone, PartialEq, Eq)]
pub struct Modulus {
    prime: BigUint,
    bytes: Vec<u8>,
}

impl Modulus {
    /// Parse the raw big-endian bytes sent by the relay
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let prime = BigUint::from_bytes_be(bytes);
        if prime.bits() < MIN_MODULUS_BITS {
            return Err(CryptoError::InvalidModulus(format!(
                "{} bits, need at least {}",
                prime.bits(),
                MIN_MODULUS_BITS
            )));
        }
        if !prime.bit(0) {
            return Err(CryptoError::InvalidModulus("modulus is even".to_string()));
        }
        let bytes = prime.to_bytes_be();
        Ok(Modulus { prime, bytes })
    }

    /// Raw big-endian bytes, as sent on the wire
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size in bits
    pub fn bits(&self) -> u64 {
        self.prime.bits()
    }

    /// Size in bytes; shared secrets and public values are padded to this
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    fn contains(&self, value: &BigUint) -> bool {
        let two = BigUint::from(2u32);
        value >= &two && value <= &(&self.prime - &two)
    }
}

impl fmt::Debug for Modulus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modulus({} bits)", self.bits())
    }
}

/// A Diffie-Hellman public value, kept alongside its base64 wire form
///
/// The relay compares the wire form byte for byte, so the original string is
/// preserved rather than re-encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicValue {
    value: BigUint,
    encoded: String,
}

impl PublicValue {
    /// Decode a base64 public value
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        if bytes.is_empty() {
            return Err(CryptoError::InvalidEncoding("empty public value".to_string()));
        }
        Ok(PublicValue {
            value: BigUint::from_bytes_be(&bytes),
            encoded: encoded.to_string(),
        })
    }

    /// The base64 wire form
    pub fn as_base64(&self) -> &str {
        &self.encoded
    }

    /// Short hex fingerprint for logs
    pub fn fingerprint(&self) -> String {
        Hash::hash_hex(self.encoded.as_bytes())[..16].to_string()
    }
}

impl fmt::Debug for PublicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicValue({}...)", self.fingerprint())
    }
}

/// Raw Diffie-Hellman output, left-padded to the modulus length
#[derive(ZeroizeOnDrop)]
pub struct SharedSecret {
    secret: Vec<u8>,
}

impl SharedSecret {
    /// Get the raw bytes (be careful with this!)
    pub fn as_bytes(&self) -> &[u8] {
        &self.secret
    }

    /// Hash the secret into a symmetric cipher key
    pub fn derive_key(&self) -> HashOutput {
        Hash::hash(&self.secret)
    }
}

/// The keypair an endpoint holds for one connection lifetime
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    #[zeroize(skip)]
    modulus: Modulus,
    #[zeroize(skip)]
    public_value: PublicValue,
    private_exponent: Vec<u8>,
}

impl KeyPair {
    /// Generate a fresh keypair over the given modulus
    pub fn generate(modulus: &Modulus) -> Self {
        let mut rng = rand::thread_rng();
        let low = BigUint::from(2u32);
        let high = BigUint::from(1u32) << PRIVATE_EXPONENT_BITS;
        let private = rng.gen_biguint_range(&low, &high);

        let public = BigUint::from(GENERATOR).modpow(&private, &modulus.prime);
        let padded = to_padded_bytes(&public, modulus.byte_len());
        let public_value = PublicValue {
            value: public,
            encoded: BASE64.encode(padded),
        };

        KeyPair {
            modulus: modulus.clone(),
            public_value,
            private_exponent: private.to_bytes_be(),
        }
    }

    /// Our public value, to be announced to the relay
    pub fn public_value(&self) -> &PublicValue {
        &self.public_value
    }

    /// Combine our private exponent with a peer's public value
    pub fn diffie_hellman(&self, peer: &PublicValue) -> CryptoResult<SharedSecret> {
        if !self.modulus.contains(&peer.value) {
            return Err(CryptoError::InvalidPublicKey);
        }
        let private = BigUint::from_bytes_be(&self.private_exponent);
        let shared = peer.value.modpow(&private, &self.modulus.prime);
        Ok(SharedSecret {
            secret: to_padded_bytes(&shared, self.modulus.byte_len()),
        })
    }

    /// `Hash(DH(private, peer))`, recomputed on every call
    pub fn derive_key(&self, peer: &PublicValue) -> CryptoResult<HashOutput> {
        Ok(self.diffie_hellman(peer)?.derive_key())
    }
}

fn to_padded_bytes(value: &BigUint, len: usize) -> Vec<u8> {
    let raw = value.to_bytes_be();
    if raw.len() >= len {
        return raw;
    }
    let mut padded = vec![0u8; len - raw.len()];
    padded.extend_from_slice(&raw);
    padded
}
