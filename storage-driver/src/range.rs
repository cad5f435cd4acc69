use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{self, AsyncWrite};

use crate::driver::Writer;

/// A window into an object's bytes: skip `offset` bytes, then read up to
/// `length` bytes (or to the end when `length` is `None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ByteRange {
    /// First byte of the window.
    pub offset: u64,

    /// Number of bytes in the window, or `None` for "until the end".
    pub length: Option<u64>,
}

impl ByteRange {
    /// The whole object.
    pub const fn full() -> Self {
        Self {
            offset: 0,
            length: None,
        }
    }

    /// `length` bytes starting at `offset`.
    pub const fn new(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length: Some(length),
        }
    }

    /// Everything from `offset` to the end.
    pub const fn from_offset(offset: u64) -> Self {
        Self {
            offset,
            length: None,
        }
    }

    /// Whether this range covers the entire object.
    pub fn is_full(&self) -> bool {
        self.offset == 0 && self.length.is_none()
    }

    /// Clamp this range to an object of `size` bytes, returning the
    /// `(start, end_exclusive)` pair actually covered.
    pub fn bounds(&self, size: u64) -> (u64, u64) {
        let start = self.offset.min(size);
        let end = match self.length {
            Some(length) => start.saturating_add(length).min(size),
            None => size,
        };
        (start, end)
    }
}

/// Wraps a writer so that only bytes inside a [`ByteRange`] are forwarded.
///
/// Bytes before the window are acknowledged and dropped; bytes after it are
/// acknowledged and dropped too, so a full download can be driven through it.
pub(crate) struct RangeWriter<'a, 'w> {
    inner: &'a mut Writer<'w>,
    skip: u64,
    remaining: Option<u64>,
}

impl<'a, 'w> RangeWriter<'a, 'w> {
    pub(crate) fn new(inner: &'a mut Writer<'w>, range: ByteRange) -> Self {
        Self {
            inner,
            skip: range.offset,
            remaining: range.length,
        }
    }
}

impl AsyncWrite for RangeWriter<'_, '_> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        // Consume the skipped prefix on its own so that a pending inner write
        // never leaves `skip` half-applied.
        if this.skip > 0 {
            let skipped = this.skip.min(buf.len() as u64);
            this.skip -= skipped;
            return Poll::Ready(Ok(skipped as usize));
        }

        let window = match this.remaining {
            Some(0) => return Poll::Ready(Ok(buf.len())),
            Some(remaining) => &buf[..remaining.min(buf.len() as u64) as usize],
            None => buf,
        };

        match Pin::new(&mut *this.inner).poll_write(cx, window) {
            Poll::Ready(Ok(written)) => {
                if let Some(remaining) = this.remaining.as_mut() {
                    *remaining -= written as u64;
                }
                Poll::Ready(Ok(written))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn window(data: &[u8], range: ByteRange) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let sink: &mut Writer<'_> = &mut out;
            let mut writer = RangeWriter::new(sink, range);
            for chunk in data.chunks(3) {
                writer.write_all(chunk).await.unwrap();
            }
            writer.flush().await.unwrap();
        }
        out
    }

    #[tokio::test]
    async fn forwards_only_the_window() {
        let data = b"0123456789abcdef";
        assert_eq!(window(data, ByteRange::full()).await, data.to_vec());
        assert_eq!(window(data, ByteRange::new(4, 5)).await, b"45678".to_vec());
        assert_eq!(window(data, ByteRange::from_offset(12)).await, b"cdef".to_vec());
        assert_eq!(window(data, ByteRange::new(20, 5)).await, Vec::<u8>::new());
    }

    #[test]
    fn bounds_are_clamped() {
        assert_eq!(ByteRange::full().bounds(10), (0, 10));
        assert_eq!(ByteRange::new(2, 3).bounds(10), (2, 5));
        assert_eq!(ByteRange::new(8, 30).bounds(10), (8, 10));
        assert_eq!(ByteRange::from_offset(12).bounds(10), (10, 10));
    }
}
