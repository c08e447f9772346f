use std::io::{self, Read, Seek, SeekFrom};

/// Read-only view of `[offset, offset + length)` of an inner stream, clamped
/// to the stream's bounds.
///
/// Reads never cross the window's end, so callers hashing a container payload
/// cannot pick up bytes from neighbouring metadata blocks.
#[derive(Debug)]
pub struct WindowReader<R> {
    inner: R,
    start: u64,
    end: u64,
    position: u64,
}

impl<R: Read + Seek> WindowReader<R> {
    pub fn new(mut inner: R, offset: u64, length: u64) -> io::Result<Self> {
        let stream_len = inner.seek(SeekFrom::End(0))?;
        let start = offset.min(stream_len);
        let end = start.saturating_add(length).min(stream_len);
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self {
            inner,
            start,
            end,
            position: start,
        })
    }

    /// Number of bytes visible through the window.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Absolute offset of the window inside the inner stream.
    pub fn offset(&self) -> u64 {
        self.start
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> Read for WindowReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end.saturating_sub(self.position);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let allowed = usize::try_from(remaining)
            .unwrap_or(usize::MAX)
            .min(buf.len());
        let read = self.inner.read(&mut buf[..allowed])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl<R: Read + Seek> Seek for WindowReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let relative = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(delta) => self.len() as i128 + delta as i128,
            SeekFrom::Current(delta) => {
                (self.position - self.start) as i128 + delta as i128
            }
        };
        if relative < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the window",
            ));
        }
        let relative = (relative as u64).min(self.len());
        self.position = self.inner.seek(SeekFrom::Start(self.start + relative))?;
        Ok(relative)
    }
}
