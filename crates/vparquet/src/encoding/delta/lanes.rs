use super::{bit_width, write_zigzag, DeltaBackend, DeltaInt, BLOCK_SIZE, MINI_BLOCKS, MINI_BLOCK_SIZE};

const LANES: usize = 8;

/// Block encoder working on eight lanes at a time.
///
/// The kernels are plain fixed-width loops. On x86_64 hosts with AVX2 they
/// are compiled for that feature and selected at runtime.
#[derive(Debug, Clone, Copy)]
pub struct LaneBackend {
    avx2: bool,
}

impl LaneBackend {
    /// Lane kernels without any target feature
    pub fn portable() -> Self {
        Self { avx2: false }
    }

    /// Lane kernels compiled for the best feature this CPU supports, if any
    pub fn detect() -> Option<Self> {
        #[cfg(target_arch = "x86_64")]
        {
            if std::arch::is_x86_feature_detected!("avx2") {
                return Some(Self { avx2: true });
            }
        }
        None
    }
}

impl DeltaBackend for LaneBackend {
    fn name(&self) -> &'static str {
        if self.avx2 {
            "lanes-avx2"
        } else {
            "lanes"
        }
    }

    fn encode_block<T: DeltaInt>(&self, prev: T, values: &[T], out: &mut Vec<u8>) {
        #[cfg(target_arch = "x86_64")]
        {
            if self.avx2 {
                // SAFETY: avx2 is only set by `detect` after the CPU reported it
                unsafe { encode_block_avx2(prev, values, out) };
                return;
            }
        }
        encode_block_lanes(prev, values, out)
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn encode_block_avx2<T: DeltaInt>(prev: T, values: &[T], out: &mut Vec<u8>) {
    encode_block_lanes(prev, values, out)
}

#[inline(always)]
fn encode_block_lanes<T: DeltaInt>(prev: T, values: &[T], out: &mut Vec<u8>) {
    let len = values.len().min(BLOCK_SIZE);
    let last = values[len - 1];

    let mut block = [last; BLOCK_SIZE];
    block[..len].copy_from_slice(&values[..len]);
    let mut before = [last; BLOCK_SIZE];
    before[0] = prev;
    before[1..].copy_from_slice(&block[..BLOCK_SIZE - 1]);

    let mut deltas = [T::default(); BLOCK_SIZE];
    for ((d, b), p) in deltas
        .chunks_exact_mut(LANES)
        .zip(block.chunks_exact(LANES))
        .zip(before.chunks_exact(LANES))
    {
        for lane in 0..LANES {
            d[lane] = b[lane].wrapping_sub(p[lane]);
        }
    }

    let min = T::from_i64(block_min(&deltas[..len]));

    let mut adjusted = [0u64; BLOCK_SIZE];
    for (a, d) in adjusted.chunks_exact_mut(LANES).zip(deltas.chunks_exact(LANES)) {
        for lane in 0..LANES {
            a[lane] = d[lane].wrapping_sub(min).to_bits();
        }
    }
    adjusted[len..].fill(0);

    write_zigzag(out, min.to_i64());

    let mut widths = [0u32; MINI_BLOCKS];
    for (width, mini) in widths.iter_mut().zip(adjusted.chunks_exact(MINI_BLOCK_SIZE)) {
        *width = mini_block_width(mini);
    }
    out.extend(widths.iter().map(|&w| w as u8));

    for (&width, mini) in widths.iter().zip(adjusted.chunks_exact(MINI_BLOCK_SIZE)) {
        match width {
            0 => {}
            1 => pack_width_1(mini, out),
            2 => pack_width_2(mini, out),
            w if w == T::BITS => pack_full(mini, T::BITS, out),
            w => pack_groups(mini, w, out),
        }
    }
}

#[inline(always)]
fn block_min<T: DeltaInt>(deltas: &[T]) -> i64 {
    let mut mins = [i64::MAX; LANES];
    let mut chunks = deltas.chunks_exact(LANES);
    for chunk in &mut chunks {
        for lane in 0..LANES {
            mins[lane] = mins[lane].min(chunk[lane].to_i64());
        }
    }
    for (lane, d) in chunks.remainder().iter().enumerate() {
        mins[lane] = mins[lane].min(d.to_i64());
    }
    mins.iter().copied().fold(i64::MAX, i64::min)
}

#[inline(always)]
fn mini_block_width(mini: &[u64]) -> u32 {
    let mut acc = [0u64; LANES];
    for chunk in mini.chunks_exact(LANES) {
        for lane in 0..LANES {
            acc[lane] |= chunk[lane];
        }
    }
    bit_width(acc.iter().fold(0, |a, b| a | b))
}

#[inline(always)]
fn pack_width_1(mini: &[u64], out: &mut Vec<u8>) {
    for chunk in mini.chunks_exact(8) {
        let mut byte = 0u8;
        for (j, &v) in chunk.iter().enumerate() {
            byte |= ((v & 1) as u8) << j;
        }
        out.push(byte);
    }
}

#[inline(always)]
fn pack_width_2(mini: &[u64], out: &mut Vec<u8>) {
    for chunk in mini.chunks_exact(4) {
        let mut byte = 0u8;
        for (j, &v) in chunk.iter().enumerate() {
            byte |= ((v & 3) as u8) << (2 * j);
        }
        out.push(byte);
    }
}

#[inline(always)]
fn pack_full(mini: &[u64], bits: u32, out: &mut Vec<u8>) {
    let bytes = (bits / 8) as usize;
    for &v in mini {
        out.extend_from_slice(&v.to_le_bytes()[..bytes]);
    }
}

/// Eight values of `width` bits fill exactly `width` bytes
#[inline(always)]
fn pack_groups(mini: &[u64], width: u32, out: &mut Vec<u8>) {
    for group in mini.chunks_exact(LANES) {
        let mut buf = [0u8; 64];
        for (j, &v) in group.iter().enumerate() {
            let bit = j as u32 * width;
            let start = (bit / 8) as usize;
            let shift = bit % 8;
            let wide = (v as u128) << shift;
            let span = (shift + width).div_ceil(8) as usize;
            for k in 0..span {
                buf[start + k] |= (wide >> (8 * k)) as u8;
            }
        }
        out.extend_from_slice(&buf[..width as usize]);
    }
}
