//! Fixed-capacity name storage for shared-memory records.
//!
//! Registry entries, pool headers, and port queues all need a
//! human-readable name, but a `String` is heap-allocated and can't live in
//! shared memory. `FixedName<N>` is a `[u8; N]` plus a length, copied in by
//! value, with the same `MAX_NAME_LEN` ceiling as segment names (spec §6).

use std::fmt;

use crate::{Error, Result, MAX_NAME_LEN};

#[derive(Clone, Copy)]
#[repr(C)]
pub struct FixedName<const N: usize = MAX_NAME_LEN> {
    bytes: [u8; N],
    len: u8,
}

impl<const N: usize> FixedName<N> {
    pub const EMPTY: Self = Self { bytes: [0; N], len: 0 };

    pub fn new(s: &str) -> Result<Self> {
        if s.len() > N {
            return Err(Error::invalid_arg(format!(
                "name {s:?} exceeds the {N}-byte limit"
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_graphic() || b == b' ' || b == b'/' || b == b'.' || b == b'-' || b == b'_') {
            return Err(Error::invalid_arg(format!("name {s:?} is not ASCII-printable")));
        }
        let mut bytes = [0u8; N];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self { bytes, len: s.len() as u8 })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for FixedName<N> {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl<const N: usize> fmt::Debug for FixedName<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> fmt::Display for FixedName<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl<const N: usize> PartialEq for FixedName<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}
impl<const N: usize> Eq for FixedName<N> {}

impl<const N: usize> PartialEq<str> for FixedName<N> {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}
