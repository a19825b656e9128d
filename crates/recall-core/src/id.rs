//! Identifier newtypes for synchronized entities.
//!
//! All ids are distinct wrappers over `String`, so a `CardId` cannot be passed
//! where a `DeckId` is expected. Freshly minted ids are random UUIDs, which is
//! what lets two offline devices create rows without coordinating.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Mints a new random id.
            pub fn new_random() -> Self {
                $name(Uuid::new_v4().simple().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }
    };
}

string_id!(
    /// Primary key of the `decks` table.
    DeckId
);
string_id!(
    /// Primary key of the `cards` table.
    CardId
);
string_id!(
    /// Primary key of the `reviews` table.
    ReviewId
);
string_id!(
    /// Primary key of a point-deletion record.
    DeletionId
);
string_id!(
    /// Primary key of a range-deletion record.
    RangeDeletionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_unique() {
        let a = CardId::new_random();
        let b = CardId::new_random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn display_prints_inner_string() {
        assert_eq!(format!("{}", DeckId::from("d1")), "d1");
    }

    #[test]
    fn serializes_as_bare_string() {
        let id = ReviewId::from("r-7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"r-7\"");
        let back: ReviewId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
