//! Cancellation: a monotonic cancel token polled by workers, plus
//! `SIGINT`/`SIGTERM` wiring. Grounded on the sibling example
//! `oferchen-rsync/crates/platform`'s `signal-hook` usage — the teacher
//! project has no signal handling at all, so this module is new relative to
//! it rather than a generalization of existing code.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Which signal (if any) triggered cancellation, so the binary can pick the
/// right exit code (130 for `SIGINT`, 143 for `SIGTERM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    None,
    Interrupt,
    Terminate,
}

const REASON_NONE: u8 = 0;
const REASON_INTERRUPT: u8 = 1;
const REASON_TERMINATE: u8 = 2;

/// A cancel token: a monotonic flag transitioning from clear to set, polled
/// by workers to effect cooperative shutdown.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    reason: Arc<AtomicU8>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(AtomicU8::new(REASON_NONE)),
        }
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Set the token with no associated signal (e.g. a fatal filesystem
    /// error, or the stall watchdog).
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    fn set_with_reason(&self, reason: CancelReason) {
        self.flag.store(true, Ordering::SeqCst);
        let code = match reason {
            CancelReason::None => REASON_NONE,
            CancelReason::Interrupt => REASON_INTERRUPT,
            CancelReason::Terminate => REASON_TERMINATE,
        };
        // Only the first signal sets the reason; later ones no-op.
        let _ = self
            .reason
            .compare_exchange(REASON_NONE, code, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn reason(&self) -> CancelReason {
        match self.reason.load(Ordering::SeqCst) {
            REASON_INTERRUPT => CancelReason::Interrupt,
            REASON_TERMINATE => CancelReason::Terminate,
            _ => CancelReason::None,
        }
    }

    /// Exit code for this cancellation per spec.md §6: 130 for `SIGINT`,
    /// 143 for `SIGTERM`, otherwise `None` (not signal-triggered).
    pub fn exit_code(&self) -> Option<i32> {
        match self.reason() {
            CancelReason::Interrupt => Some(130),
            CancelReason::Terminate => Some(143),
            CancelReason::None => None,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers `SIGINT`/`SIGTERM` handlers that set `token`. Returns an error
/// if `signal-hook` cannot install the handler (e.g. the signal is already
/// claimed by another handler in this process).
#[cfg(unix)]
pub fn install_signal_handlers(token: CancelToken) -> Result<(), std::io::Error> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::flag as signal_flag;
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    let interrupted = Arc::new(StdAtomicBool::new(false));
    let terminated = Arc::new(StdAtomicBool::new(false));
    signal_flag::register(SIGINT, interrupted.clone())?;
    signal_flag::register(SIGTERM, terminated.clone())?;

    std::thread::spawn(move || loop {
        if interrupted.load(Ordering::SeqCst) {
            token.set_with_reason(CancelReason::Interrupt);
            return;
        }
        if terminated.load(Ordering::SeqCst) {
            token.set_with_reason(CancelReason::Terminate);
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    });

    Ok(())
}

#[cfg(windows)]
pub fn install_signal_handlers(token: CancelToken) -> Result<(), std::io::Error> {
    use windows_sys::Win32::Foundation::BOOL;
    use windows_sys::Win32::System::Console::{
        SetConsoleCtrlHandler, CTRL_BREAK_EVENT, CTRL_C_EVENT,
    };

    static GLOBAL_TOKEN: std::sync::OnceLock<CancelToken> = std::sync::OnceLock::new();
    let _ = GLOBAL_TOKEN.set(token);

    unsafe extern "system" fn handler(ctrl_type: u32) -> BOOL {
        if let Some(token) = GLOBAL_TOKEN.get() {
            match ctrl_type {
                CTRL_C_EVENT => token.set_with_reason(CancelReason::Interrupt),
                CTRL_BREAK_EVENT => token.set_with_reason(CancelReason::Terminate),
                _ => {}
            }
        }
        1
    }

    let ok = unsafe { SetConsoleCtrlHandler(Some(handler), 1) };
    if ok == 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear() {
        let token = CancelToken::new();
        assert!(!token.is_set());
        assert_eq!(token.exit_code(), None);
    }

    #[test]
    fn set_with_reason_sticks_to_first_signal() {
        let token = CancelToken::new();
        token.set_with_reason(CancelReason::Interrupt);
        token.set_with_reason(CancelReason::Terminate);
        assert!(token.is_set());
        assert_eq!(token.reason(), CancelReason::Interrupt);
        assert_eq!(token.exit_code(), Some(130));
    }

    #[test]
    fn plain_set_has_no_exit_code() {
        let token = CancelToken::new();
        token.set();
        assert!(token.is_set());
        assert_eq!(token.exit_code(), None);
    }
}
