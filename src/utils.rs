//! Utility functions for identifiers and access tokens

use crate::error::StoreError;
use bech32::Bech32m;
use rand::RngCore;
use rand::rngs::OsRng;
use uuid7::uuid7;

pub const CHAIN_HRP: &str = "doc_";
pub const VERSION_HRP: &str = "ver_";
pub const WORK_ITEM_HRP: &str = "act_";
pub const EVIDENCE_HRP: &str = "evd_";
pub const LINK_HRP: &str = "lnk_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

pub(crate) fn new_id(hrp: &str) -> Result<String, StoreError> {
    new_uuid_to_bech32(hrp).map_err(|e| StoreError::Id(e.to_string()))
}

/// 32 bytes from the OS rng, hex encoded. Used for client-facing link tokens,
/// which must not be derivable from anything else we store.
pub fn new_access_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix() {
        let id = new_uuid_to_bech32(VERSION_HRP).unwrap();
        assert!(id.starts_with("ver_1"));
    }

    #[test]
    fn tokens_are_unique_hex() {
        let a = new_access_token();
        let b = new_access_token();

        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
