//! Content addressing. Keys and values are both reduced to a lowercase hex
//! SHA-256 digest before they ever touch the filesystem; the digest is the
//! only thing any path-building code is allowed to see.
//!
//! `KeyHash` and `ContentHash` are kept as distinct types (rather than both
//! being a bare `String`) so a key hash can never be handed to a function
//! that expects a content hash, or vice versa -- see the discussion of
//! `path_object` in the design notes.

use sha2::{Digest, Sha256};
use std::fmt;

/// Width, in hex characters, of a SHA-256 digest.
pub const HEX_LEN: usize = 64;

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Splits a 64-character hex digest into its two-character bucket name.
///
/// Panics if `hex` is shorter than two characters; every hash produced by
/// this module is always 64 characters, so this is an invariant violation,
/// not a reachable runtime condition.
pub fn bucket_of(hex: &str) -> &str {
    &hex[0..2]
}

macro_rules! hex_digest_newtype {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Hashes `bytes` with SHA-256 and wraps the lowercase hex digest.
            pub fn of(bytes: &[u8]) -> Self {
                Self(hex_digest(bytes))
            }

            /// Wraps an already-computed 64-character lowercase hex digest
            /// without re-hashing it, e.g. when reading one back off a
            /// symlink target.
            pub fn from_hex(hex: impl Into<String>) -> Self {
                Self(hex.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// The two-character bucket directory this hash lives under.
            pub fn bucket(&self) -> &str {
                bucket_of(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

hex_digest_newtype!(KeyHash, "The SHA-256 digest of a caller-supplied key.");
hex_digest_newtype!(ContentHash, "The SHA-256 digest of an object's bytes.");

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn key_hash_is_64_lowercase_hex_chars() {
        let h = KeyHash::of(b"alpha");
        assert_eq!(h.as_str().len(), HEX_LEN);
        assert!(h.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn same_bytes_hash_the_same() {
        assert_eq!(ContentHash::of(b"same"), ContentHash::of(b"same"));
        assert_ne!(ContentHash::of(b"same"), ContentHash::of(b"different"));
    }

    #[test]
    fn bucket_is_first_two_chars() {
        let h = ContentHash::of(b"hello world");
        assert_eq!(h.bucket(), &h.as_str()[0..2]);
        assert_eq!(h.bucket().len(), 2);
    }

    #[test]
    fn key_and_content_hash_of_empty_bytes_match_known_sha256() {
        // sha256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        let h = ContentHash::of(b"");
        assert_eq!(
            h.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85"
        );
    }
}
