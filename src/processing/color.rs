use image::Rgba;

pub const LIGHT_GRAY: [u8; 3] = [204, 204, 204];
pub const DARK_RED: [u8; 3] = [204, 0, 0];
pub const DARK_GREEN: [u8; 3] = [102, 153, 0];

pub fn opaque(rgb: [u8; 3]) -> Rgba<u8> {
    Rgba([rgb[0], rgb[1], rgb[2], 255])
}

/// Source-over compositing of straight-alpha RGBA.
pub fn blend_over(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    match src[3] {
        255 => src,
        0 => dst,
        a => {
            let sa = a as f32 / 255.0;
            let da = dst[3] as f32 / 255.0;
            let out_a = sa + da * (1.0 - sa);
            if out_a <= f32::EPSILON {
                return Rgba([0, 0, 0, 0]);
            }
            let mut out = [0u8; 4];
            for c in 0..3 {
                let s = src[c] as f32 * sa;
                let d = dst[c] as f32 * da * (1.0 - sa);
                out[c] = ((s + d) / out_a).round().clamp(0.0, 255.0) as u8;
            }
            out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
            Rgba(out)
        }
    }
}
