//! Utility functions for identifiers and store keys

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

// big-endian so sled's byte ordering matches numeric ordering
pub fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}
