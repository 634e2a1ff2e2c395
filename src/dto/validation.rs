//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates that a username is 3 to 32 characters of ASCII letters, digits, `_` or `-`.
///
/// # Examples
///
/// ```ignore
/// validate_username("lyric_fan-42") // Ok
/// validate_username("al")           // Err - too short
/// validate_username("two words")    // Err - space
/// ```
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if !(3..=32).contains(&username.len()) {
        let mut err = ValidationError::new("username_length");
        err.message = Some(
            format!(
                "Username must be between 3 and 32 characters (got {})",
                username.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        let mut err = ValidationError::new("username_format");
        err.message =
            Some("Username may only contain ASCII letters, digits, `_` and `-`".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a free-text field is not blank once trimmed.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Value must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username_valid() {
        assert!(validate_username("abc").is_ok());
        assert!(validate_username("lyric_fan-42").is_ok());
        assert!(validate_username(&"x".repeat(32)).is_ok());
    }

    #[test]
    fn test_validate_username_invalid_length() {
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"x".repeat(33)).is_err());
        assert!(validate_username("").is_err());
    }

    #[test]
    fn test_validate_username_invalid_format() {
        assert!(validate_username("two words").is_err());
        assert!(validate_username("émile").is_err());
        assert!(validate_username("semi;colon").is_err());
    }

    #[test]
    fn test_validate_not_blank() {
        assert!(validate_not_blank("sunshine").is_ok());
        assert!(validate_not_blank("   ").is_err());
        assert!(validate_not_blank("").is_err());
    }
}
