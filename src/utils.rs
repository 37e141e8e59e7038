//! Identifier generation

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32 under the given prefix
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Record id for an entity kind, e.g. `booking_1q…`.
pub(crate) fn new_record_id(kind: &str) -> Result<String, crate::error::WorkflowError> {
    new_uuid_to_bech32(&format!("{kind}_"))
        .map_err(|e| crate::error::WorkflowError::Encoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ids_carry_their_kind() {
        let id = new_record_id("booking").unwrap();
        assert!(id.starts_with("booking_1"));
        assert_ne!(id, new_record_id("booking").unwrap());
    }
}
