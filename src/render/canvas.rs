//! Drawing surface abstraction plus a software RGBA implementation.

use image::{Rgba, RgbaImage};

use crate::processing::color::blend_over;
use crate::processing::layout::Rect;
use crate::render::transform::{self, Projective};

/// The subset of a 2D canvas the tiles need.
///
/// `save`/`restore` bracket transform changes; every transform passed to
/// `concat` is applied on top of the current one.
pub trait Canvas {
    fn save(&mut self);
    fn restore(&mut self);
    fn concat(&mut self, transform: &Projective);
    fn clear(&mut self, color: Rgba<u8>);
    fn fill_rect(&mut self, rect: Rect, color: Rgba<u8>);
    /// Draw the whole image scaled into `rect`.
    fn draw_image(&mut self, image: &RgbaImage, rect: Rect);
}

/// CPU canvas backed by an [`RgbaImage`].
#[derive(Debug, Clone)]
pub struct PixelCanvas {
    pixels: RgbaImage,
    matrix: Projective,
    stack: Vec<Projective>,
}

impl PixelCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self::from_image(RgbaImage::new(width, height))
    }

    pub fn from_image(pixels: RgbaImage) -> Self {
        Self {
            pixels,
            matrix: Projective::identity(),
            stack: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    pub fn transform(&self) -> Projective {
        self.matrix
    }

    pub fn save_depth(&self) -> usize {
        self.stack.len()
    }

    // Runs `shader` with normalised rect coordinates for every covered pixel.
    fn paint<F>(&mut self, rect: Rect, shader: F)
    where
        F: Fn(f32, f32) -> Rgba<u8>,
    {
        if rect.width == 0 || rect.height == 0 {
            return;
        }
        let (w, h) = self.pixels.dimensions();
        let rw = rect.width as f32;
        let rh = rect.height as f32;

        if self.matrix == Projective::identity() {
            for py in rect.y..rect.bottom().min(h) {
                for px in rect.x..rect.right().min(w) {
                    let u = (px - rect.x) as f32 / rw;
                    let v = (py - rect.y) as f32 / rh;
                    let dst = self.pixels.get_pixel_mut(px, py);
                    *dst = blend_over(*dst, shader(u, v));
                }
            }
            return;
        }

        let Some(inverse) = transform::plane_inverse(&self.matrix) else {
            // edge-on: nothing visible
            return;
        };
        let corners = [
            (rect.x as f32, rect.y as f32),
            (rect.right() as f32, rect.y as f32),
            (rect.x as f32, rect.bottom() as f32),
            (rect.right() as f32, rect.bottom() as f32),
        ];
        let mut min = (f32::MAX, f32::MAX);
        let mut max = (f32::MIN, f32::MIN);
        for (x, y) in corners {
            let Some((tx, ty)) = transform::map_point(&self.matrix, x, y) else {
                return;
            };
            min = (min.0.min(tx), min.1.min(ty));
            max = (max.0.max(tx), max.1.max(ty));
        }
        let x0 = min.0.floor().max(0.0) as u32;
        let y0 = min.1.floor().max(0.0) as u32;
        let x1 = (max.0.ceil().max(0.0) as u32).min(w);
        let y1 = (max.1.ceil().max(0.0) as u32).min(h);

        for py in y0..y1 {
            for px in x0..x1 {
                let Some((lx, ly)) = transform::map_point(&inverse, px as f32 + 0.5, py as f32 + 0.5)
                else {
                    continue;
                };
                let u = (lx - rect.x as f32) / rw;
                let v = (ly - rect.y as f32) / rh;
                if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                    continue;
                }
                let dst = self.pixels.get_pixel_mut(px, py);
                *dst = blend_over(*dst, shader(u, v));
            }
        }
    }
}

impl Canvas for PixelCanvas {
    fn save(&mut self) {
        self.stack.push(self.matrix);
    }

    fn restore(&mut self) {
        self.matrix = self.stack.pop().unwrap_or_else(Projective::identity);
    }

    fn concat(&mut self, transform: &Projective) {
        // the new transform acts in local space, before the current one
        self.matrix = transform.then(&self.matrix);
    }

    fn clear(&mut self, color: Rgba<u8>) {
        for px in self.pixels.pixels_mut() {
            *px = color;
        }
    }

    fn fill_rect(&mut self, rect: Rect, color: Rgba<u8>) {
        self.paint(rect, |_, _| color);
    }

    fn draw_image(&mut self, image: &RgbaImage, rect: Rect) {
        let (iw, ih) = image.dimensions();
        if iw == 0 || ih == 0 {
            return;
        }
        self.paint(rect, |u, v| {
            let sx = ((u * iw as f32) as u32).min(iw - 1);
            let sy = ((v * ih as f32) as u32).min(ih - 1);
            *image.get_pixel(sx, sy)
        });
    }
}
