//! Scalar conversion kernels.
//!
//! Every kernel converts as many whole units as fit in both `src` and `dst`
//! and leaves the rest of `dst` untouched. Integer samples are little endian;
//! 12-bit samples come in pairs packed into three bytes:
//!
//! ```text
//! byte 0: a[7:0]
//! byte 1: b[3:0] << 4 | a[11:8]
//! byte 2: b[11:4]
//! ```
//!
//! 12-bit values are MSB-aligned to 16 bits before scaling, so an i12 and an
//! i16 sample of the same amplitude convert to the same float.

const SCALE: f32 = 32767.0;

#[inline]
fn unpack_i12(b: &[u8]) -> (i16, i16) {
    let a = (u16::from(b[0]) | (u16::from(b[1] & 0x0f) << 8)) << 4;
    let c = (u16::from(b[1] >> 4) | (u16::from(b[2]) << 4)) << 4;
    (a as i16, c as i16)
}

#[inline]
fn pack_i12(a: i16, c: i16, out: &mut [u8]) {
    let a = (a >> 4) as u16 & 0x0fff;
    let c = (c >> 4) as u16 & 0x0fff;
    out[0] = a as u8;
    out[1] = ((a >> 8) as u8) | ((c as u8 & 0x0f) << 4);
    out[2] = (c >> 4) as u8;
}

#[inline]
fn f32_to_i16(v: f32) -> i16 {
    (v * SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[inline]
fn i16_to_f32(v: i16) -> f32 {
    f32::from(v) / SCALE
}

#[inline]
fn read_f32(b: &[u8]) -> f32 {
    f32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

pub(crate) fn copy(src: &[u8], dst: &mut [u8]) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
}

pub(crate) fn i16_f32(src: &[u8], dst: &mut [u8]) {
    for (s, d) in src.chunks_exact(2).zip(dst.chunks_exact_mut(4)) {
        let v = i16::from_le_bytes([s[0], s[1]]);
        d.copy_from_slice(&i16_to_f32(v).to_le_bytes());
    }
}

pub(crate) fn f32_i16(src: &[u8], dst: &mut [u8]) {
    for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(2)) {
        d.copy_from_slice(&f32_to_i16(read_f32(s)).to_le_bytes());
    }
}

pub(crate) fn i12_i16(src: &[u8], dst: &mut [u8]) {
    for (s, d) in src.chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
        let (a, c) = unpack_i12(s);
        d[..2].copy_from_slice(&a.to_le_bytes());
        d[2..].copy_from_slice(&c.to_le_bytes());
    }
}

pub(crate) fn i16_i12(src: &[u8], dst: &mut [u8]) {
    for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(3)) {
        let a = i16::from_le_bytes([s[0], s[1]]);
        let c = i16::from_le_bytes([s[2], s[3]]);
        pack_i12(a, c, d);
    }
}

pub(crate) fn i12_f32(src: &[u8], dst: &mut [u8]) {
    for (s, d) in src.chunks_exact(3).zip(dst.chunks_exact_mut(8)) {
        let (a, c) = unpack_i12(s);
        d[..4].copy_from_slice(&i16_to_f32(a).to_le_bytes());
        d[4..].copy_from_slice(&i16_to_f32(c).to_le_bytes());
    }
}

pub(crate) fn f32_i12(src: &[u8], dst: &mut [u8]) {
    for (s, d) in src.chunks_exact(8).zip(dst.chunks_exact_mut(3)) {
        let a = f32_to_i16(read_f32(&s[..4]));
        let c = f32_to_i16(read_f32(&s[4..]));
        pack_i12(a, c, d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i12_packing_layout() {
        // a = 0x123, b = 0xABC (12-bit values)
        let packed = [0x23, 0xC1, 0xAB];
        let (a, c) = unpack_i12(&packed);
        assert_eq!(a, 0x1230);
        assert_eq!(c as u16, 0xABC0);

        let mut out = [0u8; 3];
        pack_i12(a, c, &mut out);
        assert_eq!(out, packed);
    }

    #[test]
    fn i16_to_f32_full_scale() {
        let src = [i16::MAX.to_le_bytes(), (-16384i16).to_le_bytes()].concat();
        let mut dst = [0u8; 8];
        i16_f32(&src, &mut dst);
        assert_eq!(read_f32(&dst[..4]), 1.0);
        assert!((read_f32(&dst[4..]) + 0.5).abs() < 1e-4);
    }

    #[test]
    fn f32_to_i16_saturates() {
        let src = [2.0f32.to_le_bytes(), (-2.0f32).to_le_bytes()].concat();
        let mut dst = [0u8; 4];
        f32_i16(&src, &mut dst);
        assert_eq!(i16::from_le_bytes([dst[0], dst[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([dst[2], dst[3]]), i16::MIN);
    }

    #[test]
    fn i12_through_f32_is_lossless() {
        let src = [0x23, 0xC1, 0xAB, 0xFF, 0x0F, 0x80];
        let mut float = [0u8; 16];
        i12_f32(&src, &mut float);
        let mut back = [0u8; 6];
        f32_i12(&float, &mut back);
        assert_eq!(back, src);
    }

    #[test]
    fn copy_stops_at_shorter_side() {
        let mut dst = [0u8; 2];
        copy(&[1, 2, 3], &mut dst);
        assert_eq!(dst, [1, 2]);
    }
}
