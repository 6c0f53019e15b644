//! Columnar tokenizer for delimited text files
//!
//! Works directly on memory-mapped byte regions. Integer parsing locates
//! the delimiter with the SIMD byte scan and folds digits without
//! branching per digit value; a record whose expected delimiter is
//! missing fails fast with a corruption error naming the file.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::io::MappedFile;
use crate::model::{encode_birthday, Birthday};
use crate::structures::simd;

/// Cursor over a delimited byte region.
pub struct Tokenizer<'a> {
    data: &'a [u8],
    pos: usize,
    file: &'a str,
}

impl<'a> Tokenizer<'a> {
    pub fn new(data: &'a [u8], file: &'a str) -> Self {
        Tokenizer { data, pos: 0, file }
    }

    fn eof(&self, expected: &str) -> Error {
        Error::corruption(
            self.file,
            format!("expected {expected} before end of region (offset {})", self.pos),
        )
    }

    /// Parse a decimal integer terminated by `delimiter` and step past it.
    /// Tolerates a leading minus sign.
    pub fn consume_long(&mut self, delimiter: u8) -> Result<i64> {
        let rest = &self.data[self.pos..];
        let Some(end) = simd::find_byte(rest, delimiter) else {
            return Err(self.eof("delimiter"));
        };
        let value = parse_decimal(&rest[..end]);
        self.pos += end + 1;
        Ok(value)
    }

    /// Parse two integers separated by `d1`, terminated by `d2`.
    pub fn consume_two_longs(&mut self, d1: u8, d2: u8) -> Result<(i64, i64)> {
        let first = self.consume_long(d1)?;
        let second = self.consume_long(d2)?;
        Ok((first, second))
    }

    /// Parse exactly `width` digit bytes, then step over `skip` more bytes.
    pub fn consume_fixed_width_long(&mut self, width: usize, skip: usize) -> Result<i64> {
        if self.pos + width > self.data.len() {
            return Err(self.eof("fixed-width field"));
        }
        let value = parse_decimal(&self.data[self.pos..self.pos + width]);
        self.pos += width + skip;
        Ok(value)
    }

    /// Parse a `YYYY-MM-DD` field into a packed [`Birthday`].
    pub fn consume_birthday(&mut self) -> Result<Birthday> {
        if self.pos + 10 > self.data.len() {
            return Err(self.eof("birthday field"));
        }
        let b = &self.data[self.pos..self.pos + 10];
        let year = fold_digits(&b[0..4]);
        let month = fold_digits(&b[5..7]);
        let day = fold_digits(&b[8..10]);
        self.pos += 10;
        Ok(encode_birthday(year, month, day))
    }

    /// Step past the next occurrence of `delimiter`; lands at the region
    /// end when none remains.
    pub fn skip_after(&mut self, delimiter: u8) {
        match simd::find_byte(&self.data[self.pos..], delimiter) {
            Some(i) => self.pos += i + 1,
            None => self.pos = self.data.len(),
        }
    }

    /// Like [`Self::skip_after`], returning the number of bytes stepped
    /// over, delimiter included.
    pub fn skip_after_counting(&mut self, delimiter: u8) -> usize {
        match simd::find_byte(&self.data[self.pos..], delimiter) {
            Some(i) => {
                self.pos += i + 1;
                i + 1
            }
            None => {
                let skipped = self.data.len() - self.pos;
                self.pos = self.data.len();
                skipped
            }
        }
    }

    #[inline]
    pub fn skip(&mut self, bytes: usize) {
        self.pos = (self.pos + bytes).min(self.data.len());
    }

    /// Number of lines from the current position to the region end; a
    /// trailing fragment without a newline counts as a line.
    pub fn count_lines(&self) -> u64 {
        let rest = &self.data[self.pos..];
        if rest.is_empty() {
            return 0;
        }
        let mut lines = simd::count_byte(rest, b'\n');
        if rest[rest.len() - 1] != b'\n' {
            lines += 1;
        }
        lines
    }

    #[inline]
    pub fn finished(&self) -> bool {
        self.pos >= self.data.len()
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn set_position(&mut self, pos: usize) {
        debug_assert!(pos <= self.data.len());
        self.pos = pos;
    }

    /// Byte at `offset` from the current position.
    #[inline]
    pub fn peek(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    /// Remaining bytes from the current position.
    #[inline]
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    #[inline]
    pub fn file(&self) -> &'a str {
        self.file
    }
}

#[inline]
fn fold_digits(bytes: &[u8]) -> u32 {
    let mut value = 0u32;
    for &b in bytes {
        value = value * 10 + (b - b'0') as u32;
    }
    value
}

#[inline]
fn parse_decimal(bytes: &[u8]) -> i64 {
    let (neg, digits) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        _ => (false, bytes),
    };
    let mut value = 0i64;
    for &b in digits {
        value = value * 10 + (b - b'0') as i64;
    }
    if neg { -value } else { value }
}

/// Re-entrant splitter of a mapped region into record-aligned chunks.
///
/// Each chunk's limit extends past the first newline following its nominal
/// end, so every record belongs to exactly one chunk; non-initial chunks
/// step past their first newline before parsing.
pub struct ChunkedFile {
    file: Arc<MappedFile>,
    name: String,
    start: usize,
    chunk_size: usize,
    num_chunks: usize,
}

impl ChunkedFile {
    /// Split `file` from `start` (typically just past the header line)
    /// into chunks of roughly `desired_chunk_size` bytes, at most
    /// `max_chunks` of them.
    pub fn new(
        file: Arc<MappedFile>,
        start: usize,
        desired_chunk_size: usize,
        max_chunks: usize,
    ) -> Self {
        let length = file.len().saturating_sub(start);
        let mut chunk_size = desired_chunk_size.max(1);
        let mut num_chunks = length / chunk_size + 1;
        if num_chunks > max_chunks {
            chunk_size = length / max_chunks;
            num_chunks = max_chunks;
        }
        let name = file.name();
        ChunkedFile {
            file,
            name,
            start,
            chunk_size: chunk_size.max(1),
            num_chunks,
        }
    }

    #[inline]
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Tokenizer over chunk `i`, aligned to record boundaries.
    pub fn tokenizer(&self, i: usize) -> Tokenizer<'_> {
        debug_assert!(i < self.num_chunks);
        let bytes = self.file.bytes();
        let nominal_start = (self.start + i * self.chunk_size).min(bytes.len());
        let nominal_end = if i == self.num_chunks - 1 {
            bytes.len()
        } else {
            (nominal_start + self.chunk_size).min(bytes.len())
        };
        // Extend past the next newline so the chunk owns the record that
        // straddles its nominal end.
        let end = if nominal_end == bytes.len() {
            nominal_end
        } else {
            match simd::find_byte(&bytes[nominal_end..], b'\n') {
                Some(off) => nominal_end + off + 1,
                None => bytes.len(),
            }
        };
        let mut tokenizer = Tokenizer::new(&bytes[nominal_start..end], &self.name);
        if i > 0 {
            tokenizer.skip_after(b'\n');
        }
        tokenizer
    }
}
