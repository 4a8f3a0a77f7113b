//! Amplitude layout conventions
//!
//! A `n`-qubit register is stored as `2^n` cells in a near-square rectangle
//! of width `2^ceil(n/2)` and height `2^floor(n/2)`. Cells are addressed in
//! row-major order, so linear index `i` lives at `(i % width, i / width)`,
//! and bit `b` of `i` is the value of qubit `b` in that basis state.

/// Largest register a single buffer may hold
pub const MAX_QUBITS: u32 = 26;

/// `(width, height)` of the near-square rectangle holding `2^qubits` cells
#[inline]
pub fn amplitude_dimensions(qubits: u32) -> (usize, usize) {
    let width = 1usize << qubits.div_ceil(2);
    let height = 1usize << (qubits / 2);
    (width, height)
}

/// 2-D coordinate of a linear cell index
#[inline]
pub fn index_to_coord(index: usize, width: usize) -> (usize, usize) {
    (index % width, index / width)
}

/// Linear cell index of a 2-D coordinate
#[inline]
pub fn coord_to_index(x: usize, y: usize, width: usize) -> usize {
    y * width + x
}

/// Flip bit `bit` of `index`
#[inline]
pub fn toggle_bit(index: usize, bit: u32) -> usize {
    index ^ (1usize << bit)
}

/// Value (0 or 1) of bit `bit` of `index`
#[inline]
pub fn filter_bit(index: usize, bit: u32) -> usize {
    (index >> bit) & 1
}

/// Mask selecting `span` contiguous bits starting at `offset`
#[inline]
pub fn span_mask(offset: u32, span: u32) -> usize {
    ((1usize << span) - 1) << offset
}

/// Rotate the low `width` bits of `index` left by `shift` positions
#[inline]
pub fn rotate_bits_left(index: usize, shift: u32, width: u32) -> usize {
    if width == 0 {
        return index;
    }
    let shift = shift % width;
    if shift == 0 {
        return index;
    }
    let mask = (1usize << width) - 1;
    let value = index & mask;
    ((value << shift) | (value >> (width - shift))) & mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions() {
        assert_eq!(amplitude_dimensions(0), (1, 1));
        assert_eq!(amplitude_dimensions(1), (2, 1));
        assert_eq!(amplitude_dimensions(2), (2, 2));
        assert_eq!(amplitude_dimensions(3), (4, 2));
        assert_eq!(amplitude_dimensions(6), (8, 8));
    }

    #[test]
    fn test_coordinates_roundtrip() {
        let (width, _) = amplitude_dimensions(5);
        for i in 0..32 {
            let (x, y) = index_to_coord(i, width);
            assert!(x < width);
            assert_eq!(coord_to_index(x, y, width), i);
        }
    }

    #[test]
    fn test_bit_primitives() {
        assert_eq!(toggle_bit(0b101, 1), 0b111);
        assert_eq!(toggle_bit(0b101, 2), 0b001);
        assert_eq!(filter_bit(0b101, 0), 1);
        assert_eq!(filter_bit(0b101, 1), 0);
        assert_eq!(span_mask(2, 3), 0b11100);
    }

    #[test]
    fn test_rotate_bits() {
        // bit 0 moves to bit 1, top bit wraps to bit 0
        assert_eq!(rotate_bits_left(0b001, 1, 3), 0b010);
        assert_eq!(rotate_bits_left(0b100, 1, 3), 0b001);
        assert_eq!(rotate_bits_left(0b110, 0, 3), 0b110);
        assert_eq!(rotate_bits_left(0b011, 2, 3), 0b101);
    }
}
