use super::{bit_width, write_zigzag, DeltaBackend, DeltaInt, BLOCK_SIZE, MINI_BLOCKS, MINI_BLOCK_SIZE};

/// Reference block encoder, one value at a time
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarBackend;

impl DeltaBackend for ScalarBackend {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn encode_block<T: DeltaInt>(&self, prev: T, values: &[T], out: &mut Vec<u8>) {
        let len = values.len().min(BLOCK_SIZE);

        let mut deltas = [T::default(); BLOCK_SIZE];
        let mut last = prev;
        for (delta, &value) in deltas.iter_mut().zip(&values[..len]) {
            *delta = value.wrapping_sub(last);
            last = value;
        }

        let mut min = deltas[0];
        for &delta in &deltas[1..len] {
            if delta.to_i64() < min.to_i64() {
                min = delta;
            }
        }

        // padding stays zero
        let mut adjusted = [0u64; BLOCK_SIZE];
        for (adj, &delta) in adjusted.iter_mut().zip(&deltas[..len]) {
            *adj = delta.wrapping_sub(min).to_bits();
        }

        write_zigzag(out, min.to_i64());

        let mut widths = [0u32; MINI_BLOCKS];
        for (width, mini) in widths.iter_mut().zip(adjusted.chunks_exact(MINI_BLOCK_SIZE)) {
            *width = mini.iter().map(|&v| bit_width(v)).max().unwrap_or(0);
        }
        out.extend(widths.iter().map(|&w| w as u8));

        for (&width, mini) in widths.iter().zip(adjusted.chunks_exact(MINI_BLOCK_SIZE)) {
            if width > 0 {
                pack(mini, width, out);
            }
        }
    }
}

/// LSB-first bit packing through a 128-bit accumulator
fn pack(values: &[u64], width: u32, out: &mut Vec<u8>) {
    let mut acc: u128 = 0;
    let mut bits = 0u32;
    for &value in values {
        acc |= (value as u128) << bits;
        bits += width;
        while bits >= 8 {
            out.push(acc as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        out.push(acc as u8);
    }
}
