//! Delta / bit-packing codec for ordered integer sequences
//!
//! The byte layout is Parquet's `DELTA_BINARY_PACKED`:
//!
//! ```text
//! header:  <block size> <mini-blocks per block> <total values> <first value>
//! block:   <min delta> <one bit width byte per mini-block> <packed mini-blocks>
//! ```
//!
//! Header sizes and counts are ULEB128, the first value and every min delta
//! are zig-zag ULEB128. Each mini-block packs its 32 adjusted deltas LSB-first
//! with its own bit width; a zero width mini-block contributes no bytes.
//!
//! Block encoding runs through a [`DeltaBackend`]. [`ScalarBackend`] is the
//! reference; [`LaneBackend`] processes eight lanes at a time and specializes
//! the packers for widths 1, 2 and the full integer width. Both produce the
//! same bytes. The backend used by [`encode_i32`] / [`encode_i64`] is picked
//! once per process by [`selected_backend`].

mod lanes;
mod scalar;

pub use lanes::LaneBackend;
pub use scalar::ScalarBackend;

use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Values per block
pub const BLOCK_SIZE: usize = 128;

/// Mini-blocks per block
pub const MINI_BLOCKS: usize = 4;

/// Values per mini-block
pub const MINI_BLOCK_SIZE: usize = BLOCK_SIZE / MINI_BLOCKS;

/// Errors raised while decoding a delta stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input at byte {0}")]
    Truncated(usize),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("bit width {width} exceeds {bits}-bit values")]
    InvalidBitWidth { width: u8, bits: u32 },

    #[error("varint at byte {0} overflows 64 bits")]
    VarintOverflow(usize),
}

/// Signed integer types the codec works on.
///
/// Deltas are taken with wrapping arithmetic in the native width, so every
/// adjusted delta fits in `BITS` bits.
pub trait DeltaInt: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const BITS: u32;

    fn wrapping_add(self, other: Self) -> Self;
    fn wrapping_sub(self, other: Self) -> Self;
    fn to_i64(self) -> i64;
    /// Truncating conversion
    fn from_i64(value: i64) -> Self;
    /// Two's complement bits, zero-extended
    fn to_bits(self) -> u64;
    /// Inverse of [`DeltaInt::to_bits`]; higher bits are dropped
    fn from_bits(bits: u64) -> Self;
}

impl DeltaInt for i32 {
    const BITS: u32 = 32;

    #[inline]
    fn wrapping_add(self, other: Self) -> Self {
        i32::wrapping_add(self, other)
    }
    #[inline]
    fn wrapping_sub(self, other: Self) -> Self {
        i32::wrapping_sub(self, other)
    }
    #[inline]
    fn to_i64(self) -> i64 {
        self as i64
    }
    #[inline]
    fn from_i64(value: i64) -> Self {
        value as i32
    }
    #[inline]
    fn to_bits(self) -> u64 {
        self as u32 as u64
    }
    #[inline]
    fn from_bits(bits: u64) -> Self {
        bits as u32 as i32
    }
}

impl DeltaInt for i64 {
    const BITS: u32 = 64;

    #[inline]
    fn wrapping_add(self, other: Self) -> Self {
        i64::wrapping_add(self, other)
    }
    #[inline]
    fn wrapping_sub(self, other: Self) -> Self {
        i64::wrapping_sub(self, other)
    }
    #[inline]
    fn to_i64(self) -> i64 {
        self
    }
    #[inline]
    fn from_i64(value: i64) -> Self {
        value
    }
    #[inline]
    fn to_bits(self) -> u64 {
        self as u64
    }
    #[inline]
    fn from_bits(bits: u64) -> Self {
        bits as i64
    }
}

/// Strategy for encoding one block of values
pub trait DeltaBackend {
    fn name(&self) -> &'static str;

    /// Append the encoding of one block to `out`.
    ///
    /// `values` holds between 1 and [`BLOCK_SIZE`] values and `prev` is the
    /// value preceding the block. A short block is padded with its last
    /// value, so padding deltas are zero and are excluded from the min delta.
    fn encode_block<T: DeltaInt>(&self, prev: T, values: &[T], out: &mut Vec<u8>);
}

/// The backend chosen for this process
#[derive(Debug, Clone, Copy)]
pub enum SelectedBackend {
    Scalar(ScalarBackend),
    Lanes(LaneBackend),
}

impl SelectedBackend {
    pub fn name(&self) -> &'static str {
        match self {
            SelectedBackend::Scalar(b) => b.name(),
            SelectedBackend::Lanes(b) => b.name(),
        }
    }

    pub fn encode<T: DeltaInt>(&self, dst: &mut Vec<u8>, src: &[T]) {
        match self {
            SelectedBackend::Scalar(b) => encode_with(b, dst, src),
            SelectedBackend::Lanes(b) => encode_with(b, dst, src),
        }
    }
}

static SELECTED: OnceLock<SelectedBackend> = OnceLock::new();

/// Backend resolved from the CPU features of this host
pub fn selected_backend() -> SelectedBackend {
    *SELECTED.get_or_init(|| {
        let backend = match LaneBackend::detect() {
            Some(lanes) => SelectedBackend::Lanes(lanes),
            None => SelectedBackend::Scalar(ScalarBackend),
        };
        tracing::debug!(backend = backend.name(), "Selected delta codec backend");
        backend
    })
}

/// Append the encoding of `src` to `dst`
pub fn encode_i32(dst: &mut Vec<u8>, src: &[i32]) {
    selected_backend().encode(dst, src)
}

/// Append the encoding of `src` to `dst`
pub fn encode_i64(dst: &mut Vec<u8>, src: &[i64]) {
    selected_backend().encode(dst, src)
}

/// Encode `src` with a specific backend
pub fn encode_with<T: DeltaInt, B: DeltaBackend>(backend: &B, dst: &mut Vec<u8>, src: &[T]) {
    write_uleb(dst, BLOCK_SIZE as u64);
    write_uleb(dst, MINI_BLOCKS as u64);
    write_uleb(dst, src.len() as u64);

    let Some((&first, rest)) = src.split_first() else {
        write_zigzag(dst, 0);
        return;
    };
    write_zigzag(dst, first.to_i64());

    let mut prev = first;
    for block in rest.chunks(BLOCK_SIZE) {
        backend.encode_block(prev, block, dst);
        if let Some(&last) = block.last() {
            prev = last;
        }
    }
}

/// Reusable decoder; keeps its mini-block scratch between calls
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    scratch: Vec<u64>,
}

impl DeltaDecoder {
    pub fn new() -> Self {
        Self {
            scratch: Vec::with_capacity(MINI_BLOCK_SIZE),
        }
    }

    /// Decode one stream from the front of `src`, appending the values to
    /// `out`. Returns the number of bytes consumed.
    pub fn decode_i32(&mut self, src: &[u8], out: &mut Vec<i32>) -> Result<usize, CodecError> {
        self.decode(src, out)
    }

    /// Decode one stream from the front of `src`, appending the values to
    /// `out`. Returns the number of bytes consumed.
    pub fn decode_i64(&mut self, src: &[u8], out: &mut Vec<i64>) -> Result<usize, CodecError> {
        self.decode(src, out)
    }

    fn decode<T: DeltaInt>(&mut self, src: &[u8], out: &mut Vec<T>) -> Result<usize, CodecError> {
        let mut pos = 0;
        let block_size = read_uleb(src, &mut pos)?;
        let mini_blocks = read_uleb(src, &mut pos)?;
        let total = read_uleb(src, &mut pos)?;
        let first = read_zigzag(src, &mut pos)?;

        if block_size == 0 || block_size % 128 != 0 {
            return Err(CodecError::InvalidHeader(format!(
                "block size {} is not a positive multiple of 128",
                block_size
            )));
        }
        if mini_blocks == 0 || block_size % mini_blocks != 0 || (block_size / mini_blocks) % 32 != 0 {
            return Err(CodecError::InvalidHeader(format!(
                "{} mini-blocks do not divide a block of {} into multiples of 32",
                mini_blocks, block_size
            )));
        }
        let total = usize::try_from(total)
            .map_err(|_| CodecError::InvalidHeader(format!("value count {} too large", total)))?;
        let mini_blocks = mini_blocks as usize;
        let mini_size = (block_size / mini_blocks as u64) as usize;

        if total == 0 {
            return Ok(pos);
        }

        out.reserve(total.min(1 << 20));
        let mut prev = T::from_i64(first);
        out.push(prev);
        let mut remaining = total - 1;

        while remaining > 0 {
            let min_delta = T::from_i64(read_zigzag(src, &mut pos)?);
            let widths_end = pos + mini_blocks;
            if widths_end > src.len() {
                return Err(CodecError::Truncated(src.len()));
            }
            let widths = &src[pos..widths_end];
            pos = widths_end;

            for &width in widths {
                // widths of mini-blocks past the last value are not meaningful
                if remaining == 0 {
                    break;
                }
                if width as u32 > T::BITS {
                    return Err(CodecError::InvalidBitWidth {
                        width,
                        bits: T::BITS,
                    });
                }
                let n = remaining.min(mini_size);
                let needed = (n * width as usize).div_ceil(8);
                if pos + needed > src.len() {
                    return Err(CodecError::Truncated(src.len()));
                }
                unpack(&src[pos..pos + needed], width as u32, n, &mut self.scratch);
                // a writer may end the stream inside the final mini-block
                pos += (mini_size * width as usize / 8).min(src.len() - pos);

                for &adjusted in &self.scratch {
                    prev = prev.wrapping_add(min_delta).wrapping_add(T::from_bits(adjusted));
                    out.push(prev);
                }
                remaining -= n;
            }
        }

        Ok(pos)
    }
}

/// Decode a whole i64 stream
pub fn decode_i64(src: &[u8]) -> Result<Vec<i64>, CodecError> {
    let mut out = Vec::new();
    DeltaDecoder::new().decode_i64(src, &mut out)?;
    Ok(out)
}

/// Decode a whole i32 stream
pub fn decode_i32(src: &[u8]) -> Result<Vec<i32>, CodecError> {
    let mut out = Vec::new();
    DeltaDecoder::new().decode_i32(src, &mut out)?;
    Ok(out)
}

/// Read `n` values of `width` bits, LSB-first, from `src`
fn unpack(src: &[u8], width: u32, n: usize, out: &mut Vec<u64>) {
    out.clear();
    if width == 0 {
        out.resize(n, 0);
        return;
    }
    let mask = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
    let width = width as usize;
    for i in 0..n {
        let bit = i * width;
        let start = bit / 8;
        let end = (bit + width).div_ceil(8);
        let mut acc: u128 = 0;
        for (k, &byte) in src[start..end].iter().enumerate() {
            acc |= (byte as u128) << (8 * k);
        }
        out.push((acc >> (bit % 8)) as u64 & mask);
    }
}

/// Bits needed to represent `value`
#[inline]
pub(crate) fn bit_width(value: u64) -> u32 {
    64 - value.leading_zeros()
}

pub(crate) fn write_uleb(dst: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        dst.push((value as u8) | 0x80);
        value >>= 7;
    }
    dst.push(value as u8);
}

pub(crate) fn write_zigzag(dst: &mut Vec<u8>, value: i64) {
    write_uleb(dst, ((value << 1) ^ (value >> 63)) as u64);
}

fn read_uleb(src: &[u8], pos: &mut usize) -> Result<u64, CodecError> {
    let start = *pos;
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *src.get(*pos).ok_or(CodecError::Truncated(*pos))?;
        *pos += 1;
        if shift == 63 && byte > 1 {
            return Err(CodecError::VarintOverflow(start));
        }
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(CodecError::VarintOverflow(start));
        }
    }
}

fn read_zigzag(src: &[u8], pos: &mut usize) -> Result<i64, CodecError> {
    let raw = read_uleb(src, pos)?;
    Ok((raw >> 1) as i64 ^ -((raw & 1) as i64))
}
