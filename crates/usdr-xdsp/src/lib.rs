//! usdr-xdsp: sample format transforms.
//!
//! A [`Transform`] is selected once at stream creation for a `(from, to)`
//! format pair and then applied to every burst. It bundles a conversion
//! kernel with the size function that scales byte counts between the two
//! representations.
//!
//! ```
//! use usdr_core::SampleFormat;
//! use usdr_xdsp::get_transform;
//!
//! let t = get_transform(SampleFormat::CI16, SampleFormat::CF32).unwrap();
//! assert_eq!(t.size(4080, false), 8160);
//! assert_eq!(t.size(8160, true), 4080);
//! ```

mod conv;

use tracing::debug;
use usdr_core::{Error, Result, SampleFormat};

/// A byte-buffer conversion kernel.
pub type ConvertFn = fn(src: &[u8], dst: &mut [u8]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    I12,
    I16,
    F32,
}

impl Scalar {
    fn of(format: SampleFormat) -> Scalar {
        match format {
            SampleFormat::I12 | SampleFormat::CI12 => Scalar::I12,
            SampleFormat::I16 | SampleFormat::CI16 => Scalar::I16,
            SampleFormat::F32 | SampleFormat::CF32 => Scalar::F32,
        }
    }
}

/// Conversion between two sample formats.
#[derive(Clone, Copy)]
pub struct Transform {
    from: SampleFormat,
    to: SampleFormat,
    convert: ConvertFn,
}

impl Transform {
    pub fn from_format(&self) -> SampleFormat {
        self.from
    }

    pub fn to_format(&self) -> SampleFormat {
        self.to
    }

    /// `true` when the transform is a plain copy.
    pub fn is_passthrough(&self) -> bool {
        self.from == self.to
    }

    /// Convert `src` into `dst`. Both slices should hold the same number of
    /// samples; extra bytes on either side are ignored.
    pub fn convert(&self, src: &[u8], dst: &mut [u8]) {
        (self.convert)(src, dst)
    }

    /// Scale a byte count across the transform.
    ///
    /// Forward, returns the output bytes produced from `bytes` of input.
    /// With `reverse`, returns the input bytes needed for `bytes` of output.
    pub fn size(&self, bytes: usize, reverse: bool) -> usize {
        let (num, den) = (self.to.scalar_bits(), self.from.scalar_bits());
        if reverse {
            bytes * den / num
        } else {
            bytes * num / den
        }
    }
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transform")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

/// Select the transform from `from` to `to`.
///
/// Both formats must agree on being real or complex; any scalar pair among
/// 12-bit, 16-bit and float is supported.
pub fn get_transform(from: SampleFormat, to: SampleFormat) -> Result<Transform> {
    if from.is_complex() != to.is_complex() {
        return Err(Error::InvalidArgument(format!(
            "no transform '{from}' -> '{to}'"
        )));
    }

    let convert: ConvertFn = match (Scalar::of(from), Scalar::of(to)) {
        (Scalar::I16, Scalar::F32) => conv::i16_f32,
        (Scalar::F32, Scalar::I16) => conv::f32_i16,
        (Scalar::I12, Scalar::I16) => conv::i12_i16,
        (Scalar::I16, Scalar::I12) => conv::i16_i12,
        (Scalar::I12, Scalar::F32) => conv::i12_f32,
        (Scalar::F32, Scalar::I12) => conv::f32_i12,
        _ => conv::copy,
    };

    if from == to {
        debug!(format = %from, "passthrough transform");
    }

    Ok(Transform { from, to, convert })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_bit_ratio() {
        let t = get_transform(SampleFormat::CI12, SampleFormat::CF32).unwrap();
        assert_eq!(t.size(4080, false), 10880);
        assert_eq!(t.size(10880, true), 4080);

        let t = get_transform(SampleFormat::CF32, SampleFormat::CI16).unwrap();
        assert_eq!(t.size(8160, false), 4080);
        assert_eq!(t.size(4080, true), 8160);
    }

    #[test]
    fn identity_is_passthrough() {
        let t = get_transform(SampleFormat::CI16, SampleFormat::CI16).unwrap();
        assert!(t.is_passthrough());
        assert_eq!(t.size(100, false), 100);
        let mut out = [0u8; 4];
        t.convert(&[1, 2, 3, 4], &mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn rejects_real_complex_mix() {
        assert!(matches!(
            get_transform(SampleFormat::CI16, SampleFormat::F32),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn ci16_to_ci12_and_back() {
        let to12 = get_transform(SampleFormat::CI16, SampleFormat::CI12).unwrap();
        let to16 = get_transform(SampleFormat::CI12, SampleFormat::CI16).unwrap();
        let src: Vec<u8> = [0x1230i16, -0x0100, 0x7ff0, i16::MIN]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mut packed = vec![0u8; to12.size(src.len(), false)];
        to12.convert(&src, &mut packed);
        assert_eq!(packed.len(), 6);
        let mut back = vec![0u8; 8];
        to16.convert(&packed, &mut back);
        assert_eq!(back, src);
    }
}
