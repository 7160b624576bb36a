//! Packed RGBA8 colors as stored in A8B8G8R8 display buffers.

/// Packs channels into the little-endian `0xAABBGGRR` word the display reads.
#[inline]
pub const fn rgba8(r: u8, g: u8, b: u8, a: u8) -> u32 {
    (a as u32) << 24 | (b as u32) << 16 | (g as u32) << 8 | r as u32
}

pub const BLACK: u32 = rgba8(0, 0, 0, 255);
pub const WHITE: u32 = rgba8(255, 255, 255, 255);
pub const RED: u32 = rgba8(255, 0, 0, 255);
pub const GREEN: u32 = rgba8(0, 255, 0, 255);
pub const BLUE: u32 = rgba8(0, 0, 255, 255);
pub const MAGENTA: u32 = rgba8(255, 0, 255, 255);

/// Unpacks a color into `[r, g, b, a]` floats in `0.0..=1.0`.
pub fn to_f32(color: u32) -> [f32; 4] {
    color.to_le_bytes().map(|c| f32::from(c) / 255.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_abgr() {
        assert_eq!(rgba8(0x11, 0x22, 0x33, 0x44), 0x4433_2211);
        assert_eq!(MAGENTA, 0xffff_00ff);
    }

    #[test]
    fn unpacks_to_unit_floats() {
        assert_eq!(to_f32(RED), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(to_f32(BLACK), [0.0, 0.0, 0.0, 1.0]);
    }
}
