//! Node and bundle identifiers.
//!
//! Full identifiers are 32 bytes, but the wire never carries them whole: a
//! node is referenced by the first 6 bytes of its SID, a bundle by the first
//! 8 bytes of its BID, and a bundle's recipient by the first 4 bytes of the
//! recipient SID. The prefix newtypes here are those on-wire forms.
//!
//! The protocol requires *case-insensitive* identifier matching. All of that
//! lives at the hex boundary ([`FromStr`] accepts either case); in-memory
//! comparison is plain byte equality.

use std::{fmt, str::FromStr};

use thiserror::Error;

/// Failed to parse a hex identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdParseError {
    /// The input was not `expected` hex digits long.
    #[error("expected {expected} hex digits, got {got}")]
    BadLength {
        /// Number of hex digits required.
        expected: usize,
        /// Number of characters provided.
        got: usize,
    },
    /// The input contained a non-hex character.
    #[error("invalid hex digit")]
    BadDigit,
}

macro_rules! byte_id {
    ($(#[$doc:meta])* $name:ident, $len:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Length of this identifier in bytes.
            pub const LEN: usize = $len;

            /// Wraps raw identifier bytes.
            #[must_use]
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// The raw identifier bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.len() != $len * 2 {
                    return Err(IdParseError::BadLength {
                        expected: $len * 2,
                        got: s.len(),
                    });
                }
                let mut bytes = [0; $len];
                hex::decode_to_slice(s, &mut bytes).map_err(|_| IdParseError::BadDigit)?;
                Ok(Self(bytes))
            }
        }
    };
}

byte_id! {
    /// Full 32-byte node identifier.
    Sid, 32
}

byte_id! {
    /// The leading 6 bytes of a [`Sid`]: how a node is named on the wire and
    /// in the peer table.
    SidPrefix, 6
}

byte_id! {
    /// Full 32-byte bundle identifier.
    BundleId, 32
}

byte_id! {
    /// The leading 8 bytes of a [`BundleId`]: how a bundle is named on the
    /// wire.
    BidPrefix, 8
}

byte_id! {
    /// The leading 4 bytes of a bundle recipient's SID, used to mark
    /// direct-addressed bundles. All zeroes means the bundle has no
    /// recipient.
    RecipientPrefix, 4
}

impl Sid {
    /// The on-wire prefix of this SID.
    #[must_use]
    pub fn prefix(&self) -> SidPrefix {
        let mut bytes = [0; SidPrefix::LEN];
        bytes.copy_from_slice(&self.0[..SidPrefix::LEN]);
        SidPrefix(bytes)
    }
}

impl BundleId {
    /// The on-wire prefix of this BID.
    #[must_use]
    pub fn prefix(&self) -> BidPrefix {
        let mut bytes = [0; BidPrefix::LEN];
        bytes.copy_from_slice(&self.0[..BidPrefix::LEN]);
        BidPrefix(bytes)
    }
}

impl RecipientPrefix {
    /// Whether this bundle carries no recipient at all.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0; Self::LEN]
    }

    /// Whether this recipient prefix addresses the given peer.
    ///
    /// The recipient prefix is shorter than a SID prefix, so this compares
    /// only the leading [`RecipientPrefix::LEN`] bytes. A broadcast prefix
    /// addresses nobody in particular.
    #[must_use]
    pub fn addresses(&self, peer: &SidPrefix) -> bool {
        !self.is_broadcast() && self.0 == peer.0[..Self::LEN]
    }
}
