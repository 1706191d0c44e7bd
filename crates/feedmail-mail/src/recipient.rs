use tracing::warn;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecipientError {
    #[error("address must contain exactly one '@'")]
    Shape,
    #[error("domain cannot be converted to ASCII")]
    Domain,
}

/// Punycode the domain part of `local@domain` so transports that only
/// speak ASCII can deliver to internationalized domains.
pub fn normalize_recipient(address: &str) -> Result<String, RecipientError> {
    let mut parts = address.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => {
            (local, domain)
        }
        _ => {
            warn!("Ignoring invalid e-mail address: {:?}", address);
            return Err(RecipientError::Shape);
        }
    };

    let ascii = idna::domain_to_ascii(domain).map_err(|e| {
        warn!("Cannot convert domain {:?} to punycode: {}", domain, e);
        RecipientError::Domain
    })?;

    Ok(format!("{}@{}", local, ascii))
}
