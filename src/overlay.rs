// src/overlay.rs
//
// Minimal pixel routines the pipeline consumes: canonical resize for the
// passthrough path and keypoint rasterization for the skeleton overlay.
// All keypoints are drawn in the base color; interest points are re-drawn
// in the highlight color afterwards.

use crate::types::FrameImage;

/// Output resolution for unannotated passthrough frames.
pub const CANONICAL_SIZE: usize = 640;

/// Base skeleton color (BGR purple).
pub const BASE_COLOR: (u8, u8, u8) = (255, 0, 255);

const KEYPOINT_RADIUS: i32 = 8;

/// Nearest-neighbor resize to CANONICAL_SIZE × CANONICAL_SIZE.
pub fn resize_canonical(src: &FrameImage) -> FrameImage {
    resize_nearest(src, CANONICAL_SIZE, CANONICAL_SIZE)
}

pub fn resize_nearest(src: &FrameImage, width: usize, height: usize) -> FrameImage {
    if src.width == width && src.height == height {
        return src.clone();
    }
    let mut dst = FrameImage::new(width, height);
    if src.width == 0 || src.height == 0 {
        return dst;
    }
    for y in 0..height {
        let sy = (y * src.height) / height;
        for x in 0..width {
            let sx = (x * src.width) / width;
            let s = (sy * src.width + sx) * 3;
            let d = (y * width + x) * 3;
            dst.data[d..d + 3].copy_from_slice(&src.data[s..s + 3]);
        }
    }
    dst
}

/// Draw filled circles at each keypoint. Points at (0, 0) are the pose
/// model's "not visible" sentinel and are skipped, as are points outside
/// the frame.
pub fn draw_keypoints(image: &mut FrameImage, points: &[[f32; 2]], color: (u8, u8, u8)) {
    for point in points {
        if point[0] == 0.0 && point[1] == 0.0 {
            continue;
        }
        if point[0] < 0.0
            || point[1] < 0.0
            || point[0] > image.width as f32
            || point[1] > image.height as f32
        {
            continue;
        }
        fill_circle(image, point[0] as i32, point[1] as i32, KEYPOINT_RADIUS, color);
    }
}

/// Full skeleton in the base color, then the interest points on top in the
/// highlight color.
pub fn draw_skeleton(
    image: &mut FrameImage,
    points: &[[f32; 2]],
    interest: &[usize],
    highlight: (u8, u8, u8),
) {
    draw_keypoints(image, points, BASE_COLOR);
    let selected: Vec<[f32; 2]> = interest
        .iter()
        .filter_map(|&idx| points.get(idx).copied())
        .collect();
    draw_keypoints(image, &selected, highlight);
}

fn fill_circle(image: &mut FrameImage, cx: i32, cy: i32, radius: i32, color: (u8, u8, u8)) {
    let (w, h) = (image.width as i32, image.height as i32);
    for dy in -radius..=radius {
        let y = cy + dy;
        if y < 0 || y >= h {
            continue;
        }
        for dx in -radius..=radius {
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            let x = cx + dx;
            if x < 0 || x >= w {
                continue;
            }
            let i = (y as usize * image.width + x as usize) * 3;
            image.data[i] = color.0;
            image.data[i + 1] = color.1;
            image.data[i + 2] = color.2;
        }
    }
}
