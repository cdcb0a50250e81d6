//! A logging implementation
//!
//! The heap only ever talks to the `log` facade. This is the sink kernels install behind it.

use core::fmt;

use crate::sync::KSpinLock;

/// Initialize the logger.
///
/// This function should only be called once.
pub fn init_logger<W: fmt::Write + Send>(logger: &'static Logger<W>, level: log::LevelFilter) {
    match log::set_logger(logger) {
        Ok(()) => (),
        Err(e) => {
            log::error!("Error initializing logger: {e}");
            return;
        }
    }
    log::set_max_level(level);
}

/// A logger writing one line per record into `W`.
pub struct Logger<W> {
    /// Where records go.
    sink: KSpinLock<W>,
}
impl<W> Logger<W> {
    /// Make a logger over the given sink.
    pub const fn new(sink: W) -> Self {
        Self {
            sink: KSpinLock::new(sink),
        }
    }

    /// Run `f` over the sink.
    ///
    /// Spins if a record is being written concurrently.
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut self.sink.lock())
    }
}

impl<W: fmt::Write + Send> log::Log for Logger<W> {
    fn log(&self, record: &log::Record) {
        use core::fmt::Write as _;

        // Logging must never block: a record that races another writer is dropped.
        let Some(mut sink) = self.sink.try_lock() else {
            return;
        };
        _ = writeln!(
            sink,
            "{level:>8} - {source} - {args}",
            level = record.level(),
            source = SourceLogWriter {
                file: record.file(),
                line: record.line()
            },
            args = record.args(),
        );
    }

    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn flush(&self) {
        // We write everything out immediately.
    }
}

struct SourceLogWriter<'a> {
    file: Option<&'a str>,
    line: Option<u32>,
}
impl fmt::Display for SourceLogWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self {
                file,
                line: Some(line),
            } => write!(f, "{}:{line}", file.unwrap_or("<unknown>")),
            Self {
                file: Some(file),
                line: None,
            } => f.write_str(file),
            Self {
                file: None,
                line: None,
            } => f.write_str("<unknown loc>"),
        }
    }
}

/// A fixed-size in-memory sink.
///
/// Useful before any output device is up. Once full, further text is dropped.
pub struct TraceBuffer<const N: usize> {
    buf: [u8; N],
    len: usize,
}
impl<const N: usize> TraceBuffer<N> {
    /// Make an empty buffer.
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
        }
    }

    /// The text written so far.
    pub fn as_str(&self) -> &str {
        // Truncation happens on a char boundary, so this can only fail on a bug in `write_str`.
        str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }

    /// Forget everything written so far.
    pub fn clear(&mut self) {
        self.len = 0;
    }
}
impl<const N: usize> Default for TraceBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
impl<const N: usize> fmt::Write for TraceBuffer<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = N - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take == s.len() {
            Ok(())
        } else {
            Err(fmt::Error)
        }
    }
}
