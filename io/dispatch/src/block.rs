//! Reference-counted pinned byte blocks for large transfers.
//!
//! A [`PinnedBlock`] is a byte region whose backing memory stays resident for
//! as long as any pin (clone) of it is alive. Block writes clone the pin and
//! release it when the transfer is reaped, so the caller keeps its handle;
//! block reads take the block by move and hand it back through the completion
//! callback.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A pinned, reference-counted byte block.
///
/// Cloning is cheap and shares the backing storage. The dispatcher is
/// single-threaded, so access is mediated by a [`RefCell`]; callers must not
/// hold a borrow across a `dispatch()` call.
#[derive(Clone)]
pub struct PinnedBlock {
    data: Rc<RefCell<Vec<u8>>>,
}

impl PinnedBlock {
    /// Allocate a zero-filled block of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: Rc::new(RefCell::new(vec![0u8; len])),
        }
    }

    /// Pin an existing byte vector.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Rc::new(RefCell::new(data)),
        }
    }

    /// Size of the block in bytes.
    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    /// Whether the block holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live pins on the block, including this one.
    pub fn pin_count(&self) -> usize {
        Rc::strong_count(&self.data)
    }

    /// Run `f` over the block's bytes.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.borrow())
    }

    /// Run `f` over the block's bytes mutably.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.data.borrow_mut())
    }

    /// Copy the block contents into a fresh vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }
}

impl fmt::Debug for PinnedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PinnedBlock({} bytes, {} pins)",
            self.len(),
            self.pin_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed() {
        let block = PinnedBlock::zeroed(8);
        assert_eq!(block.len(), 8);
        block.with(|b| assert!(b.iter().all(|&x| x == 0)));
    }

    #[test]
    fn test_pin_count_tracks_clones() {
        let block = PinnedBlock::from_vec(b"data".to_vec());
        assert_eq!(block.pin_count(), 1);
        let pin = block.clone();
        assert_eq!(block.pin_count(), 2);
        drop(pin);
        assert_eq!(block.pin_count(), 1);
    }

    #[test]
    fn test_mutation_visible_through_all_pins() {
        let block = PinnedBlock::zeroed(4);
        let pin = block.clone();
        block.with_mut(|b| b.copy_from_slice(b"abcd"));
        assert_eq!(pin.to_vec(), b"abcd".to_vec());
    }
}
