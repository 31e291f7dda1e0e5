//! Gzip encoding of request and response bodies.

use std::io::{self, Write};

use flate2::Compression;
use flate2::write::{GzDecoder, GzEncoder};

/// Start size for the decoder's target buffer.
const DECODE_BUFFER_SIZE: usize = 8192;

/// An error returned by [`decompress`].
#[derive(Debug, thiserror::Error)]
pub enum DecompressError {
    /// The input is not valid gzip data.
    #[error("invalid gzip data")]
    Invalid(#[from] io::Error),
    /// The decompressed payload exceeds the limit.
    #[error("decompressed payload exceeds {0} bytes")]
    Overflow(usize),
}

/// A plain sink for chunks of binary data with a limit.
///
/// Once the limit is reached, writes return [`io::ErrorKind::WriteZero`].
struct Sink {
    buffer: Vec<u8>,
    remaining: usize,
}

impl Sink {
    fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            remaining: limit,
        }
    }
}

impl Write for Sink {
    fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            // `flush` does not check for `Ok(0)`, so overflow must be an explicit error.
            return Err(io::ErrorKind::WriteZero.into());
        }

        if buf.len() > self.remaining {
            buf = &buf[..self.remaining];
        }

        if !buf.is_empty() && self.buffer.is_empty() {
            self.buffer.reserve(DECODE_BUFFER_SIZE.min(self.remaining));
        }

        self.buffer.extend_from_slice(buf);
        self.remaining -= buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Compresses `data` with gzip at the default compression level.
pub fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompresses gzip `data`, failing if the output grows beyond `limit` bytes.
pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>, DecompressError> {
    let mut decoder = GzDecoder::new(Sink::new(limit));

    let result = decoder
        .write_all(data)
        .and_then(|()| decoder.try_finish());

    match result {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::WriteZero => {
            return Err(DecompressError::Overflow(limit));
        }
        Err(e) => return Err(e.into()),
    }

    Ok(decoder.finish()?.buffer)
}
