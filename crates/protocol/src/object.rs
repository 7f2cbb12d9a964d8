//! Object identifiers.

use std::fmt;
use std::num::NonZeroU32;

/// Identifier of a protocol object on one connection.
///
/// Zero is the wire encoding of a null reference and never names a live
/// object, so nullable references are expressed as `Option<ObjectId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(NonZeroU32);

impl ObjectId {
    /// The display singleton always owns id 1.
    pub const DISPLAY: ObjectId = ObjectId(NonZeroU32::MIN);

    /// Highest id a client may allocate; the range above belongs to the server.
    pub const CLIENT_MAX: u32 = 0xfeff_ffff;

    /// Wrap a raw id, returning `None` for the null id.
    #[must_use]
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Raw wire value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// Whether this id lies in the server-allocated range.
    #[must_use]
    pub const fn is_server_allocated(self) -> bool {
        self.0.get() > Self::CLIENT_MAX
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ObjectId> for u32 {
    fn from(id: ObjectId) -> Self {
        id.get()
    }
}

/// Wire encoding of an optional reference.
#[must_use]
pub fn raw_or_null(id: Option<ObjectId>) -> u32 {
    id.map_or(0, ObjectId::get)
}
