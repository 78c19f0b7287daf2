// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cheshire peripherals the flasher drives directly.
//!
//! There is no PAC for this SoC, so each driver describes its register block
//! with `tock-registers` and reaches it through a `StaticRef`. Constructors are
//! `unsafe` because they can't check that the peripheral is really mapped
//! where they are told.

use core::ops::Deref;

pub mod clint;
pub mod i2c;
pub mod spi;
pub mod uart;

/// A reference to a register block at a fixed address.
pub struct StaticRef<T> {
    ptr: *const T,
}

impl<T> StaticRef<T> {
    /// # Safety
    ///
    /// `ptr` must be the address of a `T`-shaped register block, mapped for
    /// the life of the program.
    pub const unsafe fn new(ptr: *const T) -> Self {
        Self { ptr }
    }
}

impl<T> Clone for StaticRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StaticRef<T> {}

impl<T> Deref for StaticRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: covered by the contract of `StaticRef::new`.
        unsafe { &*self.ptr }
    }
}

/// Evaluates `done` until it holds, at most `polls` times.
fn poll(polls: usize, mut done: impl FnMut() -> bool) -> bool {
    (0..polls).any(|_| done())
}
