//! Fixed-or-set-once numeric bounds
//!
//! Several allocators are parameterized by numeric bounds that are either
//! known when the allocator is constructed or supplied exactly once before
//! first use. [`Bound`] covers both cases behind one accessor pair.

use std::sync::OnceLock;

use crate::error::{AllocError, AllocResult};

/// A numeric parameter that is either fixed at construction or settable
/// exactly once afterwards.
///
/// The dynamic form starts out unset; [`Bound::set`] installs the value and
/// any later `set` fails with [`AllocError::BoundAlreadySet`]. Reading an
/// unset dynamic bound yields `None`, which allocators treat as a contract
/// violation at the call site.
#[derive(Debug)]
pub enum Bound {
    /// Value known at construction, immutable.
    Fixed(usize),
    /// Value supplied once at runtime before first use.
    Dynamic(OnceLock<usize>),
}

impl Bound {
    /// Creates an unset dynamic bound.
    #[inline]
    pub fn dynamic() -> Self {
        Bound::Dynamic(OnceLock::new())
    }

    /// Current value, `None` while a dynamic bound is still unset.
    #[inline]
    pub fn value(&self) -> Option<usize> {
        match self {
            Bound::Fixed(v) => Some(*v),
            Bound::Dynamic(cell) => cell.get().copied(),
        }
    }

    /// Value of a bound that is required to be set.
    ///
    /// # Panics
    ///
    /// Panics in debug builds when the bound is still unset; using an
    /// allocator before configuring its bounds is a caller bug.
    #[inline]
    pub(crate) fn get(&self) -> usize {
        debug_assert!(self.value().is_some(), "bound used before being set");
        self.value().unwrap_or(0)
    }

    /// Installs the value of a dynamic bound.
    ///
    /// Fails on a fixed bound and on a dynamic bound that was already set.
    pub fn set(&self, value: usize) -> AllocResult<()> {
        match self {
            Bound::Fixed(_) => Err(AllocError::BoundAlreadySet),
            Bound::Dynamic(cell) => cell.set(value).map_err(|_| AllocError::BoundAlreadySet),
        }
    }

    /// Whether the bound currently holds a value.
    #[inline]
    pub fn is_set(&self) -> bool {
        self.value().is_some()
    }
}
