//! Byte and code stream plumbing shared by the header scanner and codecs
//!
//! [`PushbackReader`] is a buffered byte cursor with unbounded pushback
//! and position tracking. [`CodeReader`] and [`CodeWriter`] pack 12-bit
//! codes two to every three bytes, carrying the odd nibble between calls.

use std::io::{self, BufRead, Write};

/// Width of an LZW/S2 code in bits
pub const CODE_BITS: u32 = 12;

const CODE_MASK: u16 = (1 << CODE_BITS) - 1;

/// Buffered byte reader that can push bytes back onto its input
#[derive(Debug)]
pub struct PushbackReader<R> {
    inner: R,
    pushed: Vec<u8>,
    position: u64,
    consumed: u64,
}

impl<R: BufRead> PushbackReader<R> {
    /// Wrap a reader positioned at offset 0
    pub fn new(inner: R) -> Self {
        Self::at_position(inner, 0)
    }

    /// Wrap a reader that has already been positioned at `position`
    pub fn at_position(inner: R, position: u64) -> Self {
        Self {
            inner,
            pushed: Vec::new(),
            position,
            consumed: 0,
        }
    }

    /// Next byte, or `None` at end of input
    pub fn get(&mut self) -> io::Result<Option<u8>> {
        let byte = if let Some(byte) = self.pushed.pop() {
            byte
        } else {
            let buf = self.inner.fill_buf()?;
            let Some(&byte) = buf.first() else {
                return Ok(None);
            };
            self.inner.consume(1);
            byte
        };
        self.position += 1;
        self.consumed += 1;
        Ok(Some(byte))
    }

    /// Push `bytes` back so the next [`get`](Self::get) calls return them in order
    pub fn unget(&mut self, bytes: &[u8]) {
        self.pushed.extend(bytes.iter().rev());
        self.position = self.position.saturating_sub(bytes.len() as u64);
        self.consumed = self.consumed.saturating_sub(bytes.len() as u64);
    }

    /// Absolute offset of the next byte
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes consumed since the last [`reset_consumed`](Self::reset_consumed)
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Start a new consumption count, typically at a payload boundary
    pub fn reset_consumed(&mut self) {
        self.consumed = 0;
    }

    /// Unwrap the inner reader, discarding pushed-back bytes
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Reads 12-bit codes from a byte stream
#[derive(Debug)]
pub struct CodeReader<'a, R> {
    input: &'a mut PushbackReader<R>,
    residual: Option<u8>,
}

impl<'a, R: BufRead> CodeReader<'a, R> {
    /// Start reading codes at the current position of `input`
    pub fn new(input: &'a mut PushbackReader<R>) -> Self {
        Self {
            input,
            residual: None,
        }
    }

    /// Next code, or `None` if the input ends before a complete code
    pub fn read_code(&mut self) -> io::Result<Option<u16>> {
        let Some(first) = self.input.get()? else {
            return Ok(None);
        };
        let code = match self.residual.take() {
            Some(carry) => (u16::from(carry) << 8) | u16::from(first),
            None => {
                let Some(second) = self.input.get()? else {
                    return Ok(None);
                };
                self.residual = Some(second);
                (u16::from(first) << 4) | u16::from(second >> 4)
            }
        };
        Ok(Some(code & CODE_MASK))
    }

    /// Bytes consumed from the underlying reader
    pub fn consumed(&self) -> u64 {
        self.input.consumed()
    }
}

/// Writes 12-bit codes to a byte sink
#[derive(Debug)]
pub struct CodeWriter<W> {
    out: W,
    residual: Option<u8>,
    written: u64,
}

impl<W: Write> CodeWriter<W> {
    /// Wrap an output
    pub fn new(out: W) -> Self {
        Self {
            out,
            residual: None,
            written: 0,
        }
    }

    /// Append one code
    pub fn write_code(&mut self, code: u16) -> io::Result<()> {
        let code = code & CODE_MASK;
        match self.residual.take() {
            None => {
                self.out.write_all(&[(code >> 4) as u8])?;
                self.written += 1;
                self.residual = Some((code & 0x0F) as u8);
            }
            Some(nibble) => {
                self.out
                    .write_all(&[(nibble << 4) | (code >> 8) as u8, code as u8])?;
                self.written += 2;
            }
        }
        Ok(())
    }

    /// Flush a pending half byte and return the total bytes written
    pub fn finish(mut self) -> io::Result<u64> {
        if let Some(nibble) = self.residual.take() {
            self.out.write_all(&[nibble << 4])?;
            self.written += 1;
        }
        Ok(self.written)
    }
}
