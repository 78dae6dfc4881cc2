//! Validation helpers for DTOs.

use validator::ValidationError;

const MAX_PEER_ID_LEN: usize = 64;

/// Validates that a peer ID is 1 to 64 ASCII alphanumerics, `-` or `_`.
///
/// # Examples
///
/// ```ignore
/// validate_peer_id("4821")                             // Ok
/// validate_peer_id("3f2a9c0e5b7d4e1f9a8b6c5d4e3f2a1b") // Ok
/// validate_peer_id("48 21")                            // Err - space
/// ```
pub fn validate_peer_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_PEER_ID_LEN {
        let mut err = ValidationError::new("peer_id_length");
        err.message = Some(
            format!(
                "Peer ID must be 1 to {MAX_PEER_ID_LEN} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        let mut err = ValidationError::new("peer_id_format");
        err.message = Some("Peer ID may only contain letters, digits, '-' and '_'".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_peer_id_valid() {
        assert!(validate_peer_id("4821").is_ok());
        assert!(validate_peer_id("3f2a9c0e5b7d4e1f9a8b6c5d4e3f2a1b").is_ok());
        assert!(validate_peer_id("gate_01-b").is_ok());
    }

    #[test]
    fn test_validate_peer_id_invalid_length() {
        assert!(validate_peer_id("").is_err());
        assert!(validate_peer_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_peer_id_invalid_format() {
        assert!(validate_peer_id("48 21").is_err()); // space
        assert!(validate_peer_id("../x").is_err()); // path
        assert!(validate_peer_id("gäte").is_err()); // non-ascii
    }
}
