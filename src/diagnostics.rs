//! Where allocation failures get reported
//!
//! The adapter is handed a sink instead of reaching for a process-wide logger. Whatever the sink
//! does runs in the same restricted context as the failed allocation, so it must not allocate
//! through the adapter, block, or take locks.

use core::fmt::{self, Write};

/// Receives a message whenever an allocation fails.
///
/// Reporting is fire-and-forget: the adapter ignores whatever happens inside `report`.
pub trait DiagnosticSink {
    /// Reports one failure.
    fn report(&self, message: fmt::Arguments<'_>);
}

impl<'a, S: DiagnosticSink + ?Sized> DiagnosticSink for &'a S {
    fn report(&self, message: fmt::Arguments<'_>) {
        (**self).report(message)
    }
}

/// A sink that throws everything away.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn report(&self, _message: fmt::Arguments<'_>) {}
}

/// Size, in bytes, of the stack buffer `StderrSink` formats into.
pub const STDERR_MESSAGE_CAPACITY: usize = 256;

const STDERR_PREFIX: &str = "async_safe_alloc: ";

/// A sink that writes one line per failure to standard error.
///
/// The line is formatted into a fixed buffer on the stack (long messages are truncated) and
/// emitted with a single `write(2)`, which is async-signal-safe.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn report(&self, message: fmt::Arguments<'_>) {
        let mut line = StackMessage::<STDERR_MESSAGE_CAPACITY>::new();
        // Truncation is the only possible error, and a truncated line is still worth writing.
        let _ = line.write_str(STDERR_PREFIX);
        let _ = line.write_fmt(message);
        line.terminate_line();

        let bytes = line.as_bytes();
        // SAFETY: `bytes` is a live, initialized buffer of `bytes.len()` bytes.
        unsafe {
            libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len());
        }
    }
}

/// A fixed-capacity text buffer that silently drops what doesn't fit.
#[derive(Debug)]
pub(crate) struct StackMessage<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> StackMessage<N> {
    pub(crate) const fn new() -> Self {
        StackMessage { buf: [0; N], len: 0 }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Ends the message with a newline, overwriting the last byte if the buffer is full.
    pub(crate) fn terminate_line(&mut self) {
        if N == 0 {
            return;
        }
        if self.len == N {
            self.len -= 1;
        }
        self.buf[self.len] = b'\n';
        self.len += 1;
    }
}

impl<const N: usize> Write for StackMessage<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = N - self.len;
        let taken = s.len().min(room);
        self.buf[self.len..self.len + taken].copy_from_slice(&s.as_bytes()[..taken]);
        self.len += taken;
        if taken < s.len() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_message_formats() {
        let mut msg = StackMessage::<64>::new();
        write!(msg, "failed to allocate {} bytes", 24).unwrap();
        msg.terminate_line();
        assert_eq!(msg.as_bytes(), b"failed to allocate 24 bytes\n");
    }

    #[test]
    fn stack_message_truncates() {
        let mut msg = StackMessage::<8>::new();
        assert!(msg.write_str("0123456789").is_err());
        assert_eq!(msg.as_bytes(), b"01234567");
        msg.terminate_line();
        assert_eq!(msg.as_bytes(), b"0123456\n");
    }

    #[test]
    fn sinks_accept_reports() {
        // Nothing to observe, but neither may panic.
        NullSink.report(format_args!("dropped {}", 1));
        StderrSink.report(format_args!("test report, please ignore ({} bytes)", 16));
        (&NullSink).report(format_args!("through a reference"));
    }
}
