//! Logging macro for debugging
//!
//! `printf` is not reentrancy-safe, so this only ever prints with the `debug_logs` feature on.
//! Failures that callers need to hear about go through a `DiagnosticSink` instead.

macro_rules! debug_log {
    ($format:expr, $($arg:tt)*) => (
        #[cfg(feature = "debug_logs")]
        {
            #[allow(unused_unsafe)]
            unsafe { ::libc::printf($format.as_ptr() as *const ::libc::c_char, $($arg)*); }
        }
    );
    ($format:expr) => (
        debug_log!($format, );
    );
}
