//! Layout visualization

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::layout::DocumentLayout;

const LINE_COLORS: [Rgb<u8>; 4] = [
    Rgb([220, 40, 40]),
    Rgb([40, 160, 40]),
    Rgb([40, 80, 220]),
    Rgb([200, 140, 0]),
];

/// Draw every word box, colored per line, onto a copy of the document
pub fn draw_layout(image: &DynamicImage, layout: &DocumentLayout, thickness: u32) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (width, height) = canvas.dimensions();

    for ((line_idx, _), bounds) in layout.words() {
        let color = LINE_COLORS[line_idx % LINE_COLORS.len()];
        for t in 0..thickness {
            let x = bounds.x as i32 - t as i32;
            let y = bounds.y as i32 - t as i32;
            let w = bounds.width + 2 * t;
            let h = bounds.height + 2 * t;
            if x < 0 || y < 0 || x as u32 + w > width || y as u32 + h > height {
                break;
            }
            draw_hollow_rect_mut(&mut canvas, Rect::at(x, y).of_size(w, h), color);
        }
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::layout::{cluster_into_lines, BoundingBox, LineGrouping};

    #[test]
    fn test_draws_box_outline_per_line() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 80, Rgb([255, 255, 255])));
        let layout = cluster_into_lines(
            &[BoundingBox::new(10, 10, 30, 10), BoundingBox::new(10, 50, 30, 10)],
            1.0,
            LineGrouping::Anchor,
        );

        let out = draw_layout(&image, &layout, 1);

        assert_eq!(out.get_pixel(10, 10), &LINE_COLORS[0]);
        assert_eq!(out.get_pixel(39, 19), &LINE_COLORS[0]);
        assert_eq!(out.get_pixel(10, 50), &LINE_COLORS[1]);
        // Interior untouched
        assert_eq!(out.get_pixel(25, 15), &Rgb([255, 255, 255]));
    }
}
