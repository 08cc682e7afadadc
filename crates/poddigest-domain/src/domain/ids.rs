//! Newtype identifiers for the PodDigest data model.
//!
//! Each id wraps a `Uuid` so the type checker keeps a `PodcastId` from
//! being passed where an `EpisodeId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(PodcastId);
uuid_id!(UserId);
uuid_id!(EpisodeId);
uuid_id!(ConfigId);
uuid_id!(DigestId);
uuid_id!(ClipId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        let id = PodcastId::new();
        let rendered = id.to_string();
        let parsed: PodcastId = rendered.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn distinct_id_kinds_carry_independent_uuids() {
        let podcast = PodcastId::new();
        let episode = EpisodeId::new();
        assert_ne!(podcast.0, episode.0);
    }
}
