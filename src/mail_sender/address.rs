//! Syntax check and normalization of mailbox addresses.
//!
//! Only the grammar is checked (`local@domain`, with a dotted domain); no
//! DNS or deliverability lookup is ever made. The domain is normalized to
//! its lowercase ASCII form, the local part is kept as written.

use std::fmt;
use std::str::FromStr;

use email_address::EmailAddress;

use crate::error::InvalidAddress;

/// An address that passed [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(lettre::Address);

impl Address {
    pub fn as_str(&self) -> &str {
        self.0.as_ref()
    }

    pub fn as_lettre(&self) -> &lettre::Address {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn validate(raw: &str) -> Result<Address, InvalidAddress> {
    let invalid = |reason: &str| InvalidAddress {
        address: raw.to_string(),
        reason: reason.to_string(),
    };

    let candidate = raw.trim();
    if candidate.is_empty() {
        return Err(invalid("The email address is empty."));
    }
    let Some((local, domain)) = candidate.rsplit_once('@') else {
        return Err(invalid(
            "The email address is not valid. It must have exactly one @-sign.",
        ));
    };
    if local.is_empty() {
        return Err(invalid("There must be something before the @-sign."));
    }
    if domain.is_empty() {
        return Err(invalid("There must be something after the @-sign."));
    }

    let domain = idna::domain_to_ascii(domain)
        .map_err(|_| invalid("The domain name contains invalid characters."))?;
    if !domain.contains('.') {
        return Err(invalid(
            "The part after the @-sign is not valid. It should have a period.",
        ));
    }
    if domain.split('.').any(str::is_empty) {
        return Err(invalid(
            "The part after the @-sign cannot start or end with a period or have two periods in a row.",
        ));
    }

    let normalized = format!("{local}@{domain}");
    EmailAddress::from_str(&normalized).map_err(|e| invalid(&e.to_string()))?;

    lettre::Address::new(local, &domain)
        .map(Address)
        .map_err(|e| invalid(&e.to_string()))
}

/// Validates every entry, splitting the input into accepted addresses and
/// rejections, both in input order.
pub fn validate_all<S: AsRef<str>>(raw: &[S]) -> (Vec<Address>, Vec<InvalidAddress>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for entry in raw {
        match validate(entry.as_ref()) {
            Ok(address) => valid.push(address),
            Err(e) => invalid.push(e),
        }
    }
    (valid, invalid)
}

/// `"Name" <addr>` when a display name is present, the bare address otherwise.
pub fn format_address(address: &str, name: Option<&str>) -> String {
    match name.filter(|name| !name.is_empty()) {
        Some(name) => format!("\"{}\" <{}>", name, address),
        None => address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_shapes() {
        for raw in [
            "user@example.com",
            "first.last@example.com",
            "user+tag@example.com",
            "  padded@example.com  ",
        ] {
            assert!(validate(raw).is_ok(), "{raw}");
        }
    }

    #[test]
    fn rejects_missing_at_sign() {
        let err = validate("userexample.com").unwrap_err();
        assert!(err.reason.contains("@-sign"));
        assert_eq!(err.address, "userexample.com");
    }

    #[test]
    fn rejects_missing_domain_or_label_separator() {
        assert!(validate("user@").is_err());
        assert!(validate("@example.com").is_err());
        assert!(validate("another@invalid").is_err());
        assert!(validate("user@example..com").is_err());
        assert!(validate("").is_err());
    }

    #[test]
    fn rejects_display_name_form() {
        assert!(validate("John <john@example.com>").is_err());
    }

    #[test]
    fn lowercases_domain_but_keeps_local_part() {
        let address = validate("Alice@EXAMPLE.Com").unwrap();
        assert_eq!(address.as_str(), "Alice@example.com");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["Bob@Example.ORG", "carol@münchen.de", "dave@example.com"] {
            let once = validate(raw).unwrap();
            let twice = validate(once.as_str()).unwrap();
            assert_eq!(once, twice, "{raw}");
        }
    }

    #[test]
    fn batch_validation_partitions_input() {
        let (valid, invalid) = validate_all(&[
            "valid1@example.com",
            "invalid-email",
            "valid2@example.com",
            "another@invalid",
        ]);
        assert_eq!(valid.len(), 2);
        assert_eq!(invalid.len(), 2);
        assert_eq!(invalid[0].address, "invalid-email");
        assert_eq!(invalid[1].address, "another@invalid");
    }

    #[test]
    fn formats_with_and_without_name() {
        assert_eq!(format_address("user@example.com", None), "user@example.com");
        assert_eq!(
            format_address("user@example.com", Some("John Doe")),
            "\"John Doe\" <user@example.com>"
        );
        assert_eq!(format_address("user@example.com", Some("")), "user@example.com");
    }
}
