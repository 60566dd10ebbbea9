//! Interrupt priority level
//!
//! TLB mutation must not be interrupted on the current CPU. `splhigh`
//! returns a guard that restores the previous level on drop, so every exit
//! path out of a TLB critical section re-enables interrupts.

#[cfg(target_os = "none")]
extern "C" {
    fn splhigh() -> u32;
    fn splx(level: u32);
}

/// Interrupts-disabled region; dropping restores the previous level.
pub struct SplGuard {
    _old: u32,
}

/// Raise the interrupt priority level to "all interrupts off".
pub fn raise() -> SplGuard {
    #[cfg(target_os = "none")]
    {
        // SAFETY: splhigh only touches the status register of this CPU.
        SplGuard {
            _old: unsafe { splhigh() },
        }
    }
    #[cfg(not(target_os = "none"))]
    {
        // Hosted builds have no interrupts; the guard is purely structural.
        SplGuard { _old: 0 }
    }
}

impl Drop for SplGuard {
    fn drop(&mut self) {
        #[cfg(target_os = "none")]
        // SAFETY: restores the level this guard saved on the same CPU.
        unsafe {
            splx(self._old)
        };
    }
}
