//! Encoding of clear values into texel bytes.
//!
//! Matches what the hardware backends write for the same clear: sRGB formats
//! store the transfer-encoded value, UNORM values are rounded to nearest.

use crate::error::{GraphicsError, GraphicsResult};
use crate::types::TextureFormat;

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn snorm8(value: f32) -> u8 {
    ((value.clamp(-1.0, 1.0) * 127.0).round() as i8) as u8
}

fn unorm16(value: f32) -> u16 {
    (value.clamp(0.0, 1.0) * 65535.0).round() as u16
}

fn linear_to_srgb(value: f32) -> f32 {
    let v = value.clamp(0.0, 1.0);
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// Convert to IEEE 754 half precision, rounding half up on the dropped bits.
pub(crate) fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xff) as i32;
    let mantissa = bits & 0x7f_ffff;

    if exponent == 0xff {
        let nan = if mantissa != 0 { 0x200 } else { 0 };
        return sign | 0x7c00 | nan;
    }

    let half_exponent = exponent - 127 + 15;
    if half_exponent >= 0x1f {
        return sign | 0x7c00;
    }
    if half_exponent <= 0 {
        if half_exponent < -10 {
            return sign;
        }
        let full = mantissa | 0x80_0000;
        let shift = (14 - half_exponent) as u32;
        let half = full >> shift;
        let round = (full >> (shift - 1)) & 1;
        return sign | (half + round) as u16;
    }

    let half = ((half_exponent as u32) << 10) | (mantissa >> 13);
    let round = (mantissa >> 12) & 1;
    sign | (half + round) as u16
}

/// Bytes of one texel of `format` holding `color`.
pub(crate) fn encode_color(format: TextureFormat, color: [f32; 4]) -> GraphicsResult<Vec<u8>> {
    let [r, g, b, a] = color;
    let bytes = match format {
        TextureFormat::R8Unorm => vec![unorm8(r)],
        TextureFormat::R8Snorm => vec![snorm8(r)],
        TextureFormat::R8Uint => vec![r.clamp(0.0, 255.0) as u8],
        TextureFormat::R8Sint => vec![(r.clamp(-128.0, 127.0) as i8) as u8],
        TextureFormat::R16Unorm => unorm16(r).to_le_bytes().to_vec(),
        TextureFormat::R16Float => f32_to_f16(r).to_le_bytes().to_vec(),
        TextureFormat::Rg8Unorm => vec![unorm8(r), unorm8(g)],
        TextureFormat::R32Float => r.to_le_bytes().to_vec(),
        TextureFormat::R32Uint => (r.max(0.0) as u32).to_le_bytes().to_vec(),
        TextureFormat::Rg16Float => [f32_to_f16(r), f32_to_f16(g)]
            .iter()
            .flat_map(|h| h.to_le_bytes())
            .collect(),
        TextureFormat::Rgba8Unorm => vec![unorm8(r), unorm8(g), unorm8(b), unorm8(a)],
        TextureFormat::Rgba8UnormSrgb => vec![
            unorm8(linear_to_srgb(r)),
            unorm8(linear_to_srgb(g)),
            unorm8(linear_to_srgb(b)),
            unorm8(a),
        ],
        TextureFormat::Bgra8Unorm => vec![unorm8(b), unorm8(g), unorm8(r), unorm8(a)],
        TextureFormat::Bgra8UnormSrgb => vec![
            unorm8(linear_to_srgb(b)),
            unorm8(linear_to_srgb(g)),
            unorm8(linear_to_srgb(r)),
            unorm8(a),
        ],
        TextureFormat::Rgb10a2Unorm => {
            let unorm10 = |v: f32| (v.clamp(0.0, 1.0) * 1023.0).round() as u32;
            let alpha = (a.clamp(0.0, 1.0) * 3.0).round() as u32;
            let packed = unorm10(r) | (unorm10(g) << 10) | (unorm10(b) << 20) | (alpha << 30);
            packed.to_le_bytes().to_vec()
        }
        TextureFormat::Rgba16Float => [r, g, b, a]
            .iter()
            .flat_map(|c| f32_to_f16(*c).to_le_bytes())
            .collect(),
        TextureFormat::Rg32Float => [r, g].iter().flat_map(|c| c.to_le_bytes()).collect(),
        TextureFormat::Rgba32Float => [r, g, b, a].iter().flat_map(|c| c.to_le_bytes()).collect(),
        TextureFormat::Depth16Unorm
        | TextureFormat::Depth24UnormStencil8
        | TextureFormat::Depth32Float
        | TextureFormat::Depth32FloatStencil8 => {
            return Err(GraphicsError::State(format!(
                "cannot clear depth format {format:?} as a color target"
            )));
        }
    };
    Ok(bytes)
}

/// Bytes of one texel of a depth format holding `depth` and `stencil`.
pub(crate) fn encode_depth_stencil(
    format: TextureFormat,
    depth: f32,
    stencil: u8,
) -> GraphicsResult<Vec<u8>> {
    let depth = depth.clamp(0.0, 1.0);
    let bytes = match format {
        TextureFormat::Depth16Unorm => unorm16(depth).to_le_bytes().to_vec(),
        TextureFormat::Depth24UnormStencil8 => {
            let d24 = (depth * 16_777_215.0).round() as u32;
            (d24 | (u32::from(stencil) << 24)).to_le_bytes().to_vec()
        }
        TextureFormat::Depth32Float => depth.to_le_bytes().to_vec(),
        TextureFormat::Depth32FloatStencil8 => {
            let mut bytes = depth.to_le_bytes().to_vec();
            bytes.extend_from_slice(&[stencil, 0, 0, 0]);
            bytes
        }
        other => {
            return Err(GraphicsError::State(format!(
                "{other:?} is not a depth/stencil format"
            )));
        }
    };
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_float_conversion() {
        assert_eq!(f32_to_f16(0.0), 0x0000);
        assert_eq!(f32_to_f16(1.0), 0x3c00);
        assert_eq!(f32_to_f16(0.5), 0x3800);
        assert_eq!(f32_to_f16(-2.0), 0xc000);
        assert_eq!(f32_to_f16(65536.0), 0x7c00);
        assert_eq!(f32_to_f16(f32::INFINITY), 0x7c00);
    }

    #[test]
    fn test_red_clear_rgba8() {
        let bytes = encode_color(TextureFormat::Rgba8Unorm, [1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(bytes, vec![255, 0, 0, 255]);
        let bytes = encode_color(TextureFormat::Bgra8Unorm, [1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(bytes, vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_srgb_midpoint() {
        let bytes = encode_color(TextureFormat::Rgba8UnormSrgb, [0.5, 0.0, 1.0, 0.5]).unwrap();
        assert_eq!(bytes, vec![188, 0, 255, 128]);
    }

    #[test]
    fn test_rgb10a2_packing() {
        let bytes = encode_color(TextureFormat::Rgb10a2Unorm, [1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(u32::from_le_bytes(bytes.try_into().unwrap()), 0xc000_03ff);
    }

    #[test]
    fn test_depth_encodings() {
        let bytes = encode_depth_stencil(TextureFormat::Depth32Float, 1.0, 0).unwrap();
        assert_eq!(bytes, 1.0f32.to_le_bytes().to_vec());
        let bytes = encode_depth_stencil(TextureFormat::Depth24UnormStencil8, 1.0, 7).unwrap();
        assert_eq!(bytes, vec![0xff, 0xff, 0xff, 7]);
        assert!(encode_color(TextureFormat::Depth32Float, [0.0; 4]).is_err());
    }
}
