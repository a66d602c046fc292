//! Key domains and the tokens derived from them.
//!
//! A logical key is `prefix + token`. Tokens for domain values have the shape
//! `DOMAIN@_@Variant`; plain string keys are used as-is.

use strum::IntoEnumIterator;

/// Separator between the domain name and the variant name in a key token.
pub const TOKEN_SEPARATOR: &str = "@_@";

/// An enumerated key space a record store is typed over.
///
/// Implement it on a fieldless enum deriving `strum::EnumIter` and
/// `strum::AsRefStr`. `DOMAIN` plays the role of a fully-qualified type name:
/// it must stay constant for the lifetime of stored data, since it feeds
/// every hashed key.
///
/// ```
/// use sealpref_core::key::KeyDomain;
/// use strum::{AsRefStr, EnumIter};
///
/// #[derive(Debug, Clone, Copy, EnumIter, AsRefStr)]
/// enum SaveKey {
///     Volume,
///     Profile,
/// }
///
/// impl KeyDomain for SaveKey {
///     const DOMAIN: &'static str = "game::SaveKey";
/// }
///
/// assert_eq!(SaveKey::Volume.token(), "game::SaveKey@_@Volume");
/// ```
pub trait KeyDomain: Copy + IntoEnumIterator + AsRef<str> {
    const DOMAIN: &'static str;

    fn token(&self) -> String {
        format!("{}{TOKEN_SEPARATOR}{}", Self::DOMAIN, self.as_ref())
    }

    /// Every value of the domain, in declaration order.
    fn all() -> Vec<Self> {
        Self::iter().collect()
    }
}

/// Static association of a record type with a key in one key domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDeclaration {
    token: String,
    domain: &'static str,
}

impl KeyDeclaration {
    /// Declare `key` of domain `K` as the storage key of a record type.
    pub fn of<K: KeyDomain>(key: K) -> Self {
        Self {
            token: key.token(),
            domain: K::DOMAIN,
        }
    }

    /// Declare a plain string token, used as-is, for record stores typed
    /// over domain `K`.
    pub fn raw<K: KeyDomain>(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            domain: K::DOMAIN,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn domain(&self) -> &'static str {
        self.domain
    }
}
