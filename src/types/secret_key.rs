use std::fmt;

/// The upstream credential.
///
/// Deliberately neither `Display` nor `Serialize`; `Debug` is redacted. The
/// only way to read the value is [`SecretKey::expose`], which the upstream
/// transport calls when it builds the `Authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(String);

impl SecretKey {
    /// Wraps a key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let key = SecretKey::new("sk-or-v1-abcdef");
        let debug = format!("{key:?}");
        assert!(!debug.contains("abcdef"));
        assert_eq!(key.expose(), "sk-or-v1-abcdef");
    }
}
