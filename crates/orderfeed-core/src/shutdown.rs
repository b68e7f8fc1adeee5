//! Graceful shutdown support via atomic flag

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity of interruptible sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Global shutdown flag, set by SIGTERM/SIGINT handler
pub fn shutdown_flag() -> &'static AtomicBool {
    static FLAG: AtomicBool = AtomicBool::new(false);
    &FLAG
}

/// Check if shutdown was requested
pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Request shutdown (for signal handlers)
pub fn request_shutdown() {
    shutdown_flag().store(true, Ordering::Relaxed);
}

/// Sleep for `duration`, waking early once `flag` is set.
///
/// Returns `false` if the sleep was cut short.
pub fn sleep_unless(flag: &AtomicBool, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if flag.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// [`sleep_unless`] on the global shutdown flag
pub fn sleep_unless_shutdown(duration: Duration) -> bool {
    sleep_unless(shutdown_flag(), duration)
}

/// Register SIGTERM/SIGINT handlers.
///
/// First signal sets the shutdown flag so an in-flight run stops before it
/// publishes or commits its checkpoint. Second signal exits immediately.
pub fn install_signal_handlers() -> std::io::Result<()> {
    // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
    unsafe {
        signal_hook::low_level::register(signal_hook::consts::SIGTERM, || {
            if shutdown_flag().swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
        })?;
        signal_hook::low_level::register(signal_hook::consts::SIGINT, || {
            if shutdown_flag().swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_runs_to_completion() {
        let flag = AtomicBool::new(false);
        let start = Instant::now();
        assert!(sleep_unless(&flag, Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn sleep_skipped_when_flag_set() {
        let flag = AtomicBool::new(true);
        let start = Instant::now();
        assert!(!sleep_unless(&flag, Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
