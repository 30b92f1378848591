//! Engine.IO protocol revisions.
//!
//! Clients announce their revision with the `EIO` query parameter. The
//! polling framing in [`crate::payload`] is the revision 4 format.

use crate::codec::ProtocolError;

/// Current protocol revision.
pub const PROTOCOL_REVISION: Revision = Revision(4);

/// An Engine.IO protocol revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Revision(pub u8);

impl Revision {
    /// Resolve the revision requested by a client.
    ///
    /// A missing parameter means the current revision.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnsupportedRevision`] for any other revision.
    pub fn negotiate(requested: Option<u8>) -> Result<Self, ProtocolError> {
        match requested {
            None => Ok(PROTOCOL_REVISION),
            Some(r) if Revision(r).is_compatible_with(&PROTOCOL_REVISION) => Ok(Revision(r)),
            Some(r) => Err(ProtocolError::UnsupportedRevision(r)),
        }
    }

    /// Revisions are compatible only when equal; framing changed between them.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Revision) -> bool {
        self.0 == other.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EIO{}", self.0)
    }
}

impl Default for Revision {
    fn default() -> Self {
        PROTOCOL_REVISION
    }
}
