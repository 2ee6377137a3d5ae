//! Entity identifiers
//!
//! String-backed newtypes so ids of different entities cannot be mixed up
//! at call sites. `generate()` mints a fresh uuid-v4 id.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// A project owning zero or more files
    ProjectId
);
entity_id!(
    /// A reviewed document within a project
    FileId
);
entity_id!(
    /// A section of a file, the unit of consensus
    SectionId
);
entity_id!(
    /// A reviewer identity from the member identity system
    ReviewerId
);
entity_id!(
    /// An immutable history entry
    LedgerEntryId
);
entity_id!(
    /// A point-in-time capture of a file's section content
    SnapshotId
);
entity_id!(
    /// An external access token
    TokenId
);
