use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use crate::error::{Error, Result};

pub const RAW_ID_LEN: usize = 20;
pub const HEX_ID_LEN: usize = RAW_ID_LEN * 2;

/// A content identifier: the 20-byte digest naming an object.
///
/// Raw bytes are used for binary comparison inside index and pack files,
/// the 40-character lowercase hex form for paths and display.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; RAW_ID_LEN]);

pub(crate) fn is_hex_digit(c: u8) -> bool {
    matches!(c, b'0'..=b'9' | b'a'..=b'f')
}

impl ObjectId {
    /// Parses the full 40-hex form. Uppercase is rejected; object paths and
    /// pack contents are always lowercase.
    pub fn from_hex(s: &str) -> Result<ObjectId> {
        if s.len() != HEX_ID_LEN || !s.bytes().all(is_hex_digit) {
            return Err(Error::corrupt(format!("bad object id {s:?}")));
        }
        let mut id = [0u8; RAW_ID_LEN];
        hex::decode_to_slice(s, &mut id)
            .map_err(|e| Error::corrupt(format!("bad object id {s:?}: {e}")))?;
        Ok(ObjectId(id))
    }

    pub fn from_raw(bytes: &[u8]) -> Result<ObjectId> {
        let id: [u8; RAW_ID_LEN] = bytes
            .try_into()
            .map_err(|_| Error::corrupt(format!("object id must be {RAW_ID_LEN} bytes")))?;
        Ok(ObjectId(id))
    }

    pub fn as_bytes(&self) -> &[u8; RAW_ID_LEN] {
        &self.0
    }

    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; RAW_ID_LEN]> for ObjectId {
    fn from(value: [u8; RAW_ID_LEN]) -> ObjectId {
        ObjectId(value)
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<ObjectId> {
        ObjectId::from_hex(s)
    }
}

impl Deref for ObjectId {
    type Target = [u8; RAW_ID_LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let hex = "9072f9473cd87dcc76b213853cce7acd380b689f";
        let id = ObjectId::from_hex(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
        assert_eq!(id.first_byte(), 0x90);
    }

    #[test]
    fn rejects_uppercase_and_non_hex() {
        assert!(ObjectId::from_hex("A072f9473cd87dcc76b213853cce7acd380b689f").is_err());
        assert!(ObjectId::from_hex("g072f9473cd87dcc76b213853cce7acd380b689f").is_err());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(ObjectId::from_hex("9072f947").is_err());
        assert!(ObjectId::from_raw(&[0u8; 19]).is_err());
    }
}
