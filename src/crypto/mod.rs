use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use anyhow::{Error, Result, anyhow};
use sha1::Digest;

use crate::bencoding::Value;

pub const SHA1_LEN: usize = 20;

#[derive(PartialEq, Eq, Hash, Clone, Copy)]
pub struct Sha1(pub [u8; SHA1_LEN]);

/// Content id of a torrent: the SHA-1 of its bencoded info dictionary.
pub type InfoHash = Sha1;

impl Sha1 {
    pub fn digest(data: &[u8]) -> Self {
        Self(sha1::Sha1::digest(data).into())
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        let mut bytes = [0; SHA1_LEN];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|err| anyhow!("invalid sha1 \"{}\": {}", hex, err))?;
        Ok(Self(bytes))
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<&Value> for Sha1 {
    fn from(value: &Value) -> Self {
        Self::digest(&value.to_bytes())
    }
}

impl FromStr for Sha1 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Display for Sha1 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for Sha1 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sha1({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest() {
        assert_eq!(
            Sha1::digest(b"hello").hex(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }

    #[test]
    fn hex_round_trip() {
        let hex = "c47d187067c6cf953245f128b5fde62a3b8fa3b0";
        let sha1: Sha1 = hex.parse().unwrap();

        assert_eq!(sha1.to_string(), hex);
        assert_eq!(format!("{:?}", sha1), format!("Sha1({})", hex));
    }

    #[test]
    fn reject_short_hex() {
        assert!(Sha1::from_hex("c47d18").is_err());
    }

    #[test]
    fn info_hash_of_encoded_value() {
        let value = Value::dictionary().with_entry("name", Value::string("model"));

        assert_eq!(Sha1::from(&value), Sha1::digest(b"d4:name5:modele"));
    }
}
