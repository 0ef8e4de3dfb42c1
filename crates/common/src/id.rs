//! Stable identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity for a layer.
///
/// Assigned once when the layer is created and never reused, so references
/// recorded outside the layer stack (e.g. in the tile journal) stay valid
/// for the lifetime of the stack regardless of reordering or deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(u64);

impl LayerId {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}
