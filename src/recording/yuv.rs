/// Convert packed RGB24 to planar YUV 4:2:0 (BT.601, studio range).
///
/// Width and height must be even.
pub fn rgb_to_yuv420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;

    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for (y, row) in rgb.chunks_exact(w * 3).take(h).enumerate() {
        for (x, px) in row.chunks_exact(3).enumerate() {
            let r = i32::from(px[0]);
            let g = i32::from(px[1]);
            let b = i32::from(px[2]);

            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[y * w + x] = y_val.clamp(0, 255) as u8;

            // Chroma from the top-left pixel of each 2x2 block
            if y % 2 == 0 && x % 2 == 0 {
                let uv_idx = (y / 2) * (w / 2) + (x / 2);
                let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
            }
        }
    }

    yuv
}

/// Size in bytes of one 4:2:0 picture.
pub fn yuv420_len(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    w * h + 2 * (w / 2) * (h / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_yuv420_size() {
        let rgb = vec![128u8; 640 * 480 * 3];
        let yuv = rgb_to_yuv420(&rgb, 640, 480);
        assert_eq!(yuv.len(), 640 * 480 * 3 / 2);
        assert_eq!(yuv.len(), yuv420_len(640, 480));
    }

    #[test]
    fn test_black_and_white_luma() {
        let black = rgb_to_yuv420(&[0u8; 2 * 2 * 3], 2, 2);
        assert_eq!(black[0], 16);
        assert_eq!(black[4], 128);

        let white = rgb_to_yuv420(&[255u8; 2 * 2 * 3], 2, 2);
        assert_eq!(white[0], 235);
    }
}
