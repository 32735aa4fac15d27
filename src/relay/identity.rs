//! Owner identity as provided by the outer authentication layer.

use crate::conversation::UserId;

/// Who is driving a relay run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OwnerIdentity {
    /// A verified user.
    Authenticated(UserId),
    /// No identity was established.
    Unauthenticated,
}

impl OwnerIdentity {
    /// Resolve a raw identity value; missing or malformed values are
    /// unauthenticated.
    #[must_use]
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.map(str::parse::<UserId>) {
            Some(Ok(id)) => Self::Authenticated(id),
            Some(Err(err)) => {
                tracing::warn!("ignoring malformed user id: {err}");
                Self::Unauthenticated
            }
            None => Self::Unauthenticated,
        }
    }

    /// Id to record as owner; the anonymous id when unauthenticated.
    #[must_use]
    pub const fn owner_id(&self) -> UserId {
        match self {
            Self::Authenticated(id) => *id,
            Self::Unauthenticated => UserId::anonymous(),
        }
    }

    /// Whether a user was identified.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}
