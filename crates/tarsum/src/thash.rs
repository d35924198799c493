//! Named cryptographic hash functions.
//!
//! A [`THash`] pairs a short lowercase label with a factory returning a
//! fresh incremental hash state. The label is embedded verbatim in final
//! digest strings after the `+` separator, so two digests computed with
//! different hashes can never compare equal. The built-in set covers the
//! RustCrypto family (`sha256` by default, plus `sha224`, `sha384`,
//! `sha512`, `sha1` and `md5`); callers can register their own with
//! [`THash::new`].

use std::fmt;

use digest::DynDigest;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};

use crate::error::{Result, TarSumError};

/// A named, constructable cryptographic hash function.
#[derive(Clone)]
pub struct THash {
    name: String,
    factory: fn() -> Box<dyn DynDigest>,
}

impl THash {
    /// Construct a named hash from a label and a state factory.
    ///
    /// The factory must return a fresh, independent state on every call.
    ///
    /// # Errors
    ///
    /// Returns [`TarSumError::InvalidHashLabel`] unless the label is
    /// non-empty lowercase ASCII alphanumeric.
    pub fn new(name: impl Into<String>, factory: fn() -> Box<dyn DynDigest>) -> Result<THash> {
        let name = name.into();
        if name.is_empty()
            || !name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        {
            return Err(TarSumError::InvalidHashLabel(name));
        }
        Ok(THash { name, factory })
    }

    /// The `sha256` hash. This is the default for new digests.
    #[must_use]
    pub fn sha256() -> THash {
        THash {
            name: "sha256".into(),
            factory: || Box::<Sha256>::default(),
        }
    }

    /// The `sha224` hash.
    #[must_use]
    pub fn sha224() -> THash {
        THash {
            name: "sha224".into(),
            factory: || Box::<Sha224>::default(),
        }
    }

    /// The `sha384` hash.
    #[must_use]
    pub fn sha384() -> THash {
        THash {
            name: "sha384".into(),
            factory: || Box::<Sha384>::default(),
        }
    }

    /// The `sha512` hash.
    #[must_use]
    pub fn sha512() -> THash {
        THash {
            name: "sha512".into(),
            factory: || Box::<Sha512>::default(),
        }
    }

    /// The `sha1` hash.
    #[must_use]
    pub fn sha1() -> THash {
        THash {
            name: "sha1".into(),
            factory: || Box::<Sha1>::default(),
        }
    }

    /// The `md5` hash.
    #[must_use]
    pub fn md5() -> THash {
        THash {
            name: "md5".into(),
            factory: || Box::<Md5>::default(),
        }
    }

    /// Look up a built-in hash by its label.
    #[must_use]
    pub fn named(label: &str) -> Option<THash> {
        match label {
            "sha256" => Some(THash::sha256()),
            "sha224" => Some(THash::sha224()),
            "sha384" => Some(THash::sha384()),
            "sha512" => Some(THash::sha512()),
            "sha1" => Some(THash::sha1()),
            "md5" => Some(THash::md5()),
            _ => None,
        }
    }

    /// The label embedded in digest strings.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Obtain a fresh incremental hash state.
    #[must_use]
    pub fn hasher(&self) -> Box<dyn DynDigest> {
        (self.factory)()
    }
}

impl Default for THash {
    fn default() -> Self {
        THash::sha256()
    }
}

impl fmt::Debug for THash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // factory doesn't impl Debug
        f.debug_struct("THash").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_validation() {
        assert!(THash::new("blake3", || Box::<Sha256>::default()).is_ok());
        for bad in ["", "SHA256", "sha-256", "sha 256", "sha256\n"] {
            assert!(matches!(
                THash::new(bad, || Box::<Sha256>::default()),
                Err(TarSumError::InvalidHashLabel(_))
            ));
        }
    }

    #[test]
    fn test_named_lookup() {
        for label in ["sha256", "sha224", "sha384", "sha512", "sha1", "md5"] {
            assert_eq!(THash::named(label).unwrap().name(), label);
        }
        assert!(THash::named("crc32").is_none());
    }

    #[test]
    fn test_factories_are_independent() {
        let thash = THash::sha256();
        let mut a = thash.hasher();
        let b = thash.hasher();
        a.update(b"data");
        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_known_digest() {
        let mut hasher = THash::sha256().hasher();
        hasher.update(b"");
        assert_eq!(
            hex::encode(hasher.finalize()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        let mut hasher = THash::md5().hasher();
        hasher.update(b"");
        assert_eq!(hex::encode(hasher.finalize()), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
