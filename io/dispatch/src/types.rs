//! Core identifier and event types for the dispatcher.

use std::fmt;

/// Opaque connection identifier.
///
/// Returned when a connection is registered with the dispatcher and used to
/// address it in every subsequent operation.
///
/// Internally encodes both a registry slot index and a generation counter to
/// prevent misattribution when slots are reused: a handle left over from an
/// unregistered connection is detected as stale instead of aliasing onto
/// whatever connection occupies the slot next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub(crate) u64);

impl ConnId {
    /// Create a connection ID from a raw slot value (generation 0).
    ///
    /// This is primarily useful for testing purposes.
    #[inline]
    pub fn new(slot: usize) -> Self {
        Self(slot as u64 & 0xFFFF_FFFF)
    }

    /// Create a connection ID with both slot and generation.
    #[inline]
    pub(crate) fn with_generation(slot: usize, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (slot as u64 & 0xFFFF_FFFF))
    }

    /// The registry slot index, suitable for indexing into per-connection
    /// arrays.
    #[inline]
    pub fn slot(&self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    /// The generation counter part of the connection ID.
    #[inline]
    pub(crate) fn generation(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The full encoded value including the generation, suitable for use as
    /// a map key.
    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    /// Rebuild a connection ID from a value produced by
    /// [`ConnId::as_usize`].
    #[inline]
    pub(crate) fn from_usize(raw: usize) -> Self {
        Self(raw as u64)
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.slot())
    }
}

/// A readiness report produced by one multiplexer wait.
///
/// Only directions the dispatcher asked to watch are reported; the dispatcher
/// routes each report to the head pending transfer for that connection and
/// direction.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    /// The connection that became ready.
    pub conn: ConnId,
    /// The connection can be read without blocking.
    pub readable: bool,
    /// The connection can be written without blocking.
    pub writable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conn_id_roundtrip() {
        let id = ConnId::new(42);
        assert_eq!(id.slot(), 42);
        assert_eq!(id.as_usize(), 42);
        assert_eq!(format!("{}", id), "conn#42");
    }

    #[test]
    fn test_conn_id_equality_and_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(ConnId::new(1));
        set.insert(ConnId::new(2));
        set.insert(ConnId::new(1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_generation_distinguishes_reused_slot() {
        let first = ConnId::with_generation(3, 0);
        let second = ConnId::with_generation(3, 1);
        assert_eq!(first.slot(), second.slot());
        assert_eq!(second.generation(), 1);
        assert_ne!(first, second);
        assert_ne!(first.as_usize(), second.as_usize());
    }

    #[test]
    fn test_from_usize_rebuilds_full_id() {
        let id = ConnId::with_generation(7, 9);
        assert_eq!(ConnId::from_usize(id.as_usize()), id);
    }
}
