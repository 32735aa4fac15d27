// File: src/conversation/ids.rs

//! Identifier types for conversations and their owners.
//!
//! Both ids are UUID newtypes generated server-side. They serialize as the
//! plain hyphenated UUID string and parse back with `FromStr`, so they can be
//! used directly in URL paths, headers and `SQLite` `TEXT` columns.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declare a UUID newtype with a consistent API.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// Create a new random identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[inline]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Borrow the underlying UUID.
            #[inline]
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            #[inline]
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s.trim())?))
            }
        }
    };
}

define_uuid_id!(
    /// Identifier of a stored conversation.
    ConversationId
);

define_uuid_id!(
    /// Identifier of the user owning a conversation.
    ///
    /// Ownership is recorded, not enforced: the relay only requires that an
    /// owner value exists. Unauthenticated runs use [`UserId::anonymous`].
    UserId
);

impl UserId {
    /// Placeholder owner for runs made before authentication is established.
    #[inline]
    #[must_use]
    pub const fn anonymous() -> Self {
        Self(Uuid::nil())
    }

    /// Whether this is the anonymous placeholder.
    #[inline]
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.0.is_nil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ConversationId::new(), ConversationId::new());
    }

    #[test]
    fn test_display_and_parse() {
        let id = ConversationId::new();
        let parsed: ConversationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<ConversationId>().is_err());
        assert!("".parse::<UserId>().is_err());
    }

    #[test]
    fn test_anonymous_user() {
        let anon = UserId::anonymous();
        assert!(anon.is_anonymous());
        assert!(!UserId::new().is_anonymous());
        assert_eq!(anon.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_serde_transparent() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
