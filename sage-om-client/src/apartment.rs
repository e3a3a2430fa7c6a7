//! RAII guard for single-threaded apartment (STA) initialization.
//!
//! Objets Métiers objects live in an STA: every call into a session must
//! come from the thread that created it. The guard initializes COM in
//! apartment-threaded mode and tears it down on drop.

use crate::errors::SageResult;
use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static PINNED: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` when the current thread holds a live [`ApartmentGuard`].
pub fn is_pinned() -> bool {
    PINNED.with(Cell::get)
}

/// Drop guard for STA thread initialization.
///
/// # Thread Safety
///
/// `ApartmentGuard` is intentionally `!Send` and `!Sync`. COM apartment
/// membership is per-thread, so the guard must be created and dropped on
/// the same OS thread. This is enforced at compile time.
#[derive(Debug)]
pub struct ApartmentGuard {
    /// Prevents `Send + Sync` auto-derivation.
    _not_send: PhantomData<*mut ()>,
    was_pinned: bool,
}

impl ApartmentGuard {
    /// Enter a single-threaded apartment on the current thread.
    ///
    /// `S_FALSE` (already initialized in STA on this thread) counts as success.
    /// On non-Windows targets there is no COM runtime; the guard only marks
    /// the thread as pinned.
    pub fn enter() -> SageResult<Self> {
        #[cfg(windows)]
        {
            use windows::Win32::System::Com::{COINIT_APARTMENTTHREADED, CoInitializeEx};

            // SAFETY: Standard Win32 FFI call. The result is checked below and
            // `CoUninitialize` is paired in Drop on this same thread (!Send).
            let hr = unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) };
            if let Err(e) = hr.ok() {
                tracing::error!(error = ?e, "COM STA initialization failed");
                return Err(e.into());
            }
        }

        let was_pinned = PINNED.with(|p| p.replace(true));
        tracing::trace!("STA entered");

        Ok(Self {
            _not_send: PhantomData,
            was_pinned,
        })
    }
}

impl Drop for ApartmentGuard {
    fn drop(&mut self) {
        tracing::trace!("STA teardown");

        #[cfg(windows)]
        {
            // SAFETY: Paired with the successful `CoInitializeEx` in `enter()`.
            // Only runs on the creating thread (!Send).
            unsafe {
                windows::Win32::System::Com::CoUninitialize();
            }
        }

        PINNED.with(|p| p.set(self.was_pinned));
    }
}
