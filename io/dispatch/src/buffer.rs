//! Owned byte buffer moved through read and write completions.

use std::fmt;
use std::ops::{Deref, DerefMut};

/// An owned, fixed-content byte buffer.
///
/// Buffers are moved into the dispatcher for writes and delivered by move to
/// read completion callbacks. A buffer delivered to a read callback has
/// exactly the requested length on success; an empty buffer signals that the
/// peer closed the connection before the read completed.
#[derive(Default, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    /// Create an empty buffer.
    #[inline]
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Create a zero-filled buffer of `len` bytes.
    #[inline]
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: vec![0u8; len],
        }
    }

    /// Create a buffer by copying `data`.
    #[inline]
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    /// Create a buffer taking ownership of `data`.
    #[inline]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Number of bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// View the buffer contents.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable view of the buffer contents.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the buffer and return the backing vector.
    #[inline]
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer({} bytes)", self.data.len())
    }
}
