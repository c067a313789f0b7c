//! Error-accumulating writer used by the frame encoder.
//!
//! Every write after the first failure is skipped, so a chain of
//! start-line, header and body writes needs a single check at the end.

use std::io::{self, Write};

pub(crate) struct Writer<W> {
    inner: W,
    n: usize,
    err: Option<io::Error>,
}

impl<W: Write> Writer<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self {
            inner,
            n: 0,
            err: None,
        }
    }

    pub(crate) fn write_str(&mut self, s: &str) {
        self.write(s.as_bytes());
    }

    pub(crate) fn write(&mut self, buf: &[u8]) {
        if self.err.is_some() {
            return;
        }

        match self.inner.write_all(buf) {
            Ok(()) => self.n += buf.len(),
            Err(e) => self.err = Some(e),
        }
    }

    /// Bytes written so far.
    #[cfg(test)]
    pub(crate) fn written(&self) -> usize {
        self.n
    }

    /// Surface the accumulated result: total bytes or the first error.
    pub(crate) fn finish(self) -> io::Result<(W, usize)> {
        match self.err {
            Some(e) => Err(e),
            None => Ok((self.inner, self.n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts a fixed number of bytes, then fails.
    #[derive(Debug)]
    struct Limited {
        remaining: usize,
    }

    impl Write for Limited {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.len() > self.remaining {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "full"));
            }
            self.remaining -= buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_counts_bytes() {
        let mut w = Writer::new(Vec::new());
        w.write_str("abc");
        w.write(b"\r\n");
        assert_eq!(w.written(), 5);
        let (out, n) = w.finish().unwrap();
        assert_eq!(n, 5);
        assert_eq!(out, b"abc\r\n");
    }

    #[test]
    fn test_first_error_sticks() {
        let mut w = Writer::new(Limited { remaining: 4 });
        w.write_str("abc");
        w.write_str("defg");
        // skipped even though it would fit
        w.write_str("h");
        assert_eq!(w.written(), 3);
        let err = w.finish().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }
}
