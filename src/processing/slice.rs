//! Turns a source image into the per-tile regions of one grid.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fast_image_resize as fir;
use image::{ImageReader, RgbaImage, imageops};
use tracing::debug;

use crate::error::Error;
use crate::processing::layout::GridGeometry;

/// Where a face image comes from.
#[derive(Clone)]
pub enum ImageSource {
    /// An image file on disk.
    Path(PathBuf),
    /// Encoded image data in any format the decoder understands.
    Encoded(Arc<[u8]>),
    /// Pixels that are already decoded.
    Decoded(Arc<RgbaImage>),
}

/// Stable identity of an [`ImageSource`], used as cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageId {
    Path(PathBuf),
    Content([u8; 32]),
}

impl ImageSource {
    pub fn identity(&self) -> ImageId {
        match self {
            Self::Path(path) => {
                ImageId::Path(path.canonicalize().unwrap_or_else(|_| path.clone()))
            }
            Self::Encoded(bytes) => ImageId::Content(*blake3::hash(bytes).as_bytes()),
            Self::Decoded(img) => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(&img.width().to_le_bytes());
                hasher.update(&img.height().to_le_bytes());
                hasher.update(img.as_raw());
                ImageId::Content(*hasher.finalize().as_bytes())
            }
        }
    }

    /// Short human readable label for logs and errors.
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Encoded(bytes) => format!("<{} encoded bytes>", bytes.len()),
            Self::Decoded(img) => format!("<{}x{} pixels>", img.width(), img.height()),
        }
    }
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ImageSource").field(&self.describe()).finish()
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<RgbaImage> for ImageSource {
    fn from(img: RgbaImage) -> Self {
        Self::Decoded(Arc::new(img))
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Encoded(bytes.into())
    }
}

/// Row-major tile regions of one source image.
pub type Slices = Arc<[Arc<RgbaImage>]>;

/// Decode, scale to `width × width` and cut into `n × n` regions.
pub fn slice_source(source: &ImageSource, geometry: &GridGeometry) -> Result<Slices, Error> {
    let decoded = decode_rgba8(source)?;
    let side = geometry.width();
    if decoded.dimensions() == (side, side) {
        return Ok(slice_grid(&decoded, geometry));
    }
    let scaled = scale_square(source, &decoded, side)?;
    Ok(slice_grid(&scaled, geometry))
}

pub fn slice_grid(scaled: &RgbaImage, geometry: &GridGeometry) -> Slices {
    (0..geometry.tile_count())
        .map(|index| {
            let region = geometry.source_region(index);
            Arc::new(
                imageops::crop_imm(scaled, region.x, region.y, region.width, region.height)
                    .to_image(),
            )
        })
        .collect()
}

// Decodes to RGBA8 and applies EXIF orientation when the container carries it.
fn decode_rgba8(source: &ImageSource) -> Result<Arc<RgbaImage>, Error> {
    let name = source.describe();
    match source {
        ImageSource::Decoded(img) => {
            if img.width() == 0 || img.height() == 0 {
                return Err(Error::decode(name, "image has no pixels"));
            }
            Ok(Arc::clone(img))
        }
        ImageSource::Path(path) => {
            let img = ImageReader::open(path)
                .map_err(|err| Error::decode(&name, err))?
                .with_guessed_format()
                .map_err(|err| Error::decode(&name, err))?
                .decode()
                .map_err(|err| Error::decode(&name, err))?
                .to_rgba8();
            let orientation = read_orientation_from_path(path).unwrap_or(1);
            Ok(Arc::new(apply_orientation(img, orientation)))
        }
        ImageSource::Encoded(bytes) => {
            let img = ImageReader::new(Cursor::new(&bytes[..]))
                .with_guessed_format()
                .map_err(|err| Error::decode(&name, err))?
                .decode()
                .map_err(|err| Error::decode(&name, err))?
                .to_rgba8();
            let orientation = read_orientation(&mut Cursor::new(&bytes[..])).unwrap_or(1);
            Ok(Arc::new(apply_orientation(img, orientation)))
        }
    }
}

fn read_orientation_from_path(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    read_orientation(&mut BufReader::new(file))
}

fn read_orientation<R: BufRead + Seek>(reader: &mut R) -> Option<u16> {
    let exif = exif::Reader::new().read_from_container(reader).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let orientation = field.value.get_uint(0)? as u16;
    debug!(orientation, "exif orientation");
    Some(orientation)
}

fn apply_orientation(img: RgbaImage, orientation: u16) -> RgbaImage {
    match orientation {
        2 => imageops::flip_horizontal(&img),
        3 => imageops::rotate180(&img),
        4 => imageops::flip_vertical(&img),
        // transpose: rotate90 + flip_horizontal
        5 => imageops::flip_horizontal(&imageops::rotate90(&img)),
        6 => imageops::rotate90(&img),
        // transverse: rotate270 + flip_horizontal
        7 => imageops::flip_horizontal(&imageops::rotate270(&img)),
        8 => imageops::rotate270(&img),
        _ => img,
    }
}

// CatmullRom down/up-scale to the `side × side` grid square.
fn scale_square(source: &ImageSource, image: &RgbaImage, side: u32) -> Result<RgbaImage, Error> {
    let fail = |err: &dyn fmt::Display| {
        Error::decode(source.describe(), format!("scaling to {side}px: {err}"))
    };
    let (width, height) = image.dimensions();
    let view = fir::images::ImageRef::new(width, height, image.as_raw(), fir::PixelType::U8x4)
        .map_err(|err| fail(&err))?;
    let mut square = fir::images::Image::new(side, side, fir::PixelType::U8x4);
    let filter = fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom);
    fir::Resizer::new()
        .resize(&view, &mut square, Some(&fir::ResizeOptions::new().resize_alg(filter)))
        .map_err(|err| fail(&err))?;
    debug!(width, height, side, "scaled source image");
    RgbaImage::from_raw(side, side, square.into_vec()).ok_or_else(|| fail(&"pixel buffer too short"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use image::Rgba;

    // JPEG 2x1 with EXIF orientation 6 (rotate 90 CW), base64 encoded
    const ORIENT6_JPEG: &str = concat!(
        "/9j/4AAQSkZJRgABAQAAAQABAAD/4QAiRXhpZgAATU0AKgAAAAgAAQESAAMAAAABAAYAAAAAAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/",
        "2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAIDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09fb3+Pn6/8QAHwEAAwEBAQEBAQEBAQAAAAAAAAECAwQFBgcICQoL/8QAtREAAgECBAQDBAcFBAQAAQJ3AAECAxEEBSExBhJBUQdhcRMiMoEIFEKRobHBCSMzUvAVYnLRChYkNOEl8RcYGRomJygpKjU2Nzg5OkNERUZHSElKU1RVVldYWVpjZGVmZ2hpanN0dXZ3eHl6goOEhYaHiImKkpOUlZaXmJmaoqOkpaanqKmqsrO0tba3uLm6wsPExcbHyMnK0tPU1dbX2Nna4uPk5ebn6Onq8vP09fb3+Pn6/9oADAMBAAIRAxEAPwDi6KKK+ZP3E//Z"
    );

    fn quadrants(side: u32) -> RgbaImage {
        RgbaImage::from_fn(side, side, |x, y| {
            match (x < side / 2, y < side / 2) {
                (true, true) => Rgba([255, 0, 0, 255]),
                (false, true) => Rgba([0, 255, 0, 255]),
                (true, false) => Rgba([0, 0, 255, 255]),
                (false, false) => Rgba([255, 255, 0, 255]),
            }
        })
    }

    #[test]
    fn applies_orientation_six() {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(ORIENT6_JPEG)
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orient6.jpg");
        std::fs::write(&path, &bytes).unwrap();

        let from_file = decode_rgba8(&ImageSource::Path(path)).unwrap();
        assert_eq!(from_file.dimensions(), (1, 2));
        let from_bytes = decode_rgba8(&ImageSource::from(bytes)).unwrap();
        assert_eq!(from_bytes.dimensions(), (1, 2));
    }

    #[test]
    fn slices_follow_row_major_order() {
        let geometry = GridGeometry::new(100, 2, 0).unwrap();
        let slices = slice_source(&ImageSource::from(quadrants(100)), &geometry).unwrap();
        assert_eq!(slices.len(), 4);
        for slice in slices.iter() {
            assert_eq!(slice.dimensions(), (50, 50));
        }
        assert_eq!(*slices[0].get_pixel(25, 25), Rgba([255, 0, 0, 255]));
        assert_eq!(*slices[1].get_pixel(25, 25), Rgba([0, 255, 0, 255]));
        assert_eq!(*slices[2].get_pixel(25, 25), Rgba([0, 0, 255, 255]));
        assert_eq!(*slices[3].get_pixel(25, 25), Rgba([255, 255, 0, 255]));
    }

    #[test]
    fn scales_source_to_view_width() {
        let geometry = GridGeometry::new(60, 3, 0).unwrap();
        let slices = slice_source(&ImageSource::from(quadrants(240)), &geometry).unwrap();
        assert_eq!(slices.len(), 9);
        assert_eq!(slices[4].dimensions(), (20, 20));
    }

    #[test]
    fn wide_source_is_stretched_to_the_square() {
        let mut wide = RgbaImage::from_pixel(120, 40, Rgba([250, 0, 0, 255]));
        for y in 0..40 {
            for x in 60..120 {
                wide.put_pixel(x, y, Rgba([0, 0, 250, 255]));
            }
        }
        let geometry = GridGeometry::new(60, 2, 0).unwrap();
        let slices = slice_source(&ImageSource::from(wide), &geometry).unwrap();
        assert_eq!(slices[3].dimensions(), (30, 30));
        let left = slices[2].get_pixel(10, 15);
        let right = slices[3].get_pixel(20, 15);
        assert!(left[0] > 240 && left[2] < 10, "{left:?}");
        assert!(right[2] > 240 && right[0] < 10, "{right:?}");
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let geometry = GridGeometry::new(60, 3, 0).unwrap();
        let err = slice_source(&ImageSource::from(vec![1u8, 2, 3, 4]), &geometry).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn identity_depends_on_content_not_allocation() {
        let a = ImageSource::from(vec![9u8; 16]);
        let b = ImageSource::from(vec![9u8; 16]);
        let c = ImageSource::from(vec![8u8; 16]);
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }
}
