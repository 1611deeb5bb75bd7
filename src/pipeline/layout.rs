//! Page composition: where an image goes on its page.
//!
//! One image pixel maps to one PDF point. An image that would cover more than
//! `max_fill_ratio` of either page extent is shrunk uniformly until the more
//! overflowing axis hits that ratio exactly; smaller images keep their native
//! size. Either way the result is centered.

use crate::config::PageSize;
use serde::Serialize;

/// Final position and size of an image on a page, in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Uniform factor applied to the native size; `1.0` when unscaled.
    pub scale: f64,
}

/// Compute the placement of an `img_w × img_h` image on `page`.
pub fn place(img_w: u32, img_h: u32, page: PageSize, max_fill_ratio: f64) -> Placement {
    let (iw, ih) = (img_w as f64, img_h as f64);
    let max_w = page.width * max_fill_ratio;
    let max_h = page.height * max_fill_ratio;

    let (width, height, scale) = if iw > max_w || ih > max_h {
        let sx = max_w / iw;
        let sy = max_h / ih;
        // The smaller factor belongs to the axis that overflows more; pin that
        // axis to its limit exactly instead of trusting the multiplication.
        if sx <= sy {
            (max_w, ih * sx, sx)
        } else {
            (iw * sy, max_h, sy)
        }
    } else {
        (iw, ih, 1.0)
    };

    Placement {
        x: (page.width - width) / 2.0,
        y: (page.height - height) / 2.0,
        width,
        height,
        scale,
    }
}
