use validator::ValidateEmail;

/// Lowercase + trim surrounding whitespace. The one and only normalization
/// rule; fingerprinting, suppression lookups, and WRS uniqueness all go
/// through this function so they agree on what "the same recipient" means.
pub fn normalize_email(email: &str) -> String { email.trim().to_lowercase() }

/// A syntactically valid recipient (or sender) address, always stored in
/// normalized form. Used for both senders and recipients, same as the
/// teacher's `SubscriberEmail` — campaign dispatch doesn't need two separate
/// validated-email types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecipientEmail(String);

impl RecipientEmail {
    pub fn parse(email: String) -> Result<Self, String> {
        let normalized = normalize_email(&email);
        ValidateEmail::validate_email(&normalized)
            .then_some(Self(normalized))
            .ok_or(format!("Invalid email: {email:?}"))
    }
}

impl AsRef<str> for RecipientEmail {
    fn as_ref(&self) -> &str { &self.0 }
}

impl std::fmt::Display for RecipientEmail {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
