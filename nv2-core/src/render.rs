//! Accumulation images for event frames.
//!
//! Renders a window of events into a single-channel 8-bit raster: one pixel
//! per sensor coordinate, intensities accumulated per event and truncated to
//! the displayable range.

use crate::types::{EventStream, Geometry};
use image::GrayImage;
use thiserror::Error;

/// Errors that can occur while rendering frames.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("event at ({x}, {y}) lies outside the {width}x{height} sensor")]
    EventOutOfBounds {
        x: u16,
        y: u16,
        width: u32,
        height: u32,
    },

    #[error("image dimensions {0}x{1} and {2}x{3} do not match")]
    DimensionMismatch(u32, u32, u32, u32),
}

/// Intensity added per event when no polarity map is supplied.
///
/// A single event saturates its pixel unless normalization is requested.
pub const DEFAULT_INCREMENT: f32 = 255.0;

/// Grey intensity added per event of each polarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarityMap {
    /// Intensity for ON events (p = +1)
    pub on: f32,
    /// Intensity for OFF events (p = -1)
    pub off: f32,
}

/// Options controlling accumulation rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderOptions {
    /// Per-polarity intensities; when absent every event adds
    /// [`DEFAULT_INCREMENT`] regardless of polarity.
    pub polarity_map: Option<PolarityMap>,
    /// Divide the accumulator by its observed maximum and rescale to the
    /// full 8-bit range before truncation.
    pub normalize: bool,
}

/// Accumulates a window of events into a grayscale image.
///
/// The accumulator is a fresh buffer per call; repeated events at the same
/// pixel sum rather than overwrite. Events outside the geometry are an
/// error: windows cut from foreign archives are not trusted.
pub fn accumulate_frame(
    stream: &EventStream,
    geometry: Geometry,
    opts: &RenderOptions,
) -> Result<GrayImage, RenderError> {
    let width = geometry.width();
    let height = geometry.height();
    let mut acc = vec![0f32; geometry.pixel_count()];

    for i in 0..stream.len() {
        let (x, y) = (stream.x()[i], stream.y()[i]);
        if x as u32 >= width || y as u32 >= height {
            return Err(RenderError::EventOutOfBounds {
                x,
                y,
                width,
                height,
            });
        }
        let intensity = match opts.polarity_map {
            Some(map) => {
                if stream.p()[i] > 0 {
                    map.on
                } else {
                    map.off
                }
            }
            None => DEFAULT_INCREMENT,
        };
        acc[y as usize * width as usize + x as usize] += intensity;
    }

    if opts.normalize {
        let max = acc.iter().cloned().fold(0f32, f32::max);
        if max > 0.0 {
            for v in acc.iter_mut() {
                *v = *v / max * 255.0;
            }
        }
    }

    let mut image = GrayImage::new(width, height);
    for (out, v) in image.iter_mut().zip(&acc) {
        *out = v.clamp(0.0, 255.0) as u8;
    }
    Ok(image)
}

/// Absolute per-pixel difference of two equal-sized grayscale images.
pub fn diff_frames(a: &GrayImage, b: &GrayImage) -> Result<GrayImage, RenderError> {
    if a.dimensions() != b.dimensions() {
        return Err(RenderError::DimensionMismatch(
            a.width(),
            a.height(),
            b.width(),
            b.height(),
        ));
    }

    let mut out = GrayImage::new(a.width(), a.height());
    for ((o, &pa), &pb) in out.iter_mut().zip(a.iter()).zip(b.iter()) {
        *o = pa.abs_diff(pb);
    }
    Ok(out)
}

/// Summary statistics of a difference image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffStats {
    /// Number of pixels that differ
    pub changed: usize,
    /// Mean of the non-zero differences
    pub mean: f64,
    /// Largest difference
    pub max: u8,
}

/// Statistics over the non-zero pixels of a difference image, or `None`
/// when the images were identical.
pub fn diff_stats(diff: &GrayImage) -> Option<DiffStats> {
    let mut changed = 0usize;
    let mut sum = 0u64;
    let mut max = 0u8;
    for &v in diff.iter() {
        if v != 0 {
            changed += 1;
            sum += v as u64;
            max = max.max(v);
        }
    }
    (changed > 0).then(|| DiffStats {
        changed,
        mean: sum as f64 / changed as f64,
        max,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> Geometry {
        Geometry::new(4, 4).unwrap()
    }

    #[test]
    fn test_default_increment_saturates() {
        let mut stream = EventStream::new();
        stream.push(0.0, 1, 2, 1);

        let img = accumulate_frame(&stream, geometry(), &RenderOptions::default()).unwrap();
        assert_eq!(img.dimensions(), (4, 4));
        assert_eq!(img.get_pixel(1, 2).0[0], 255);
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_polarity_map_intensities() {
        let mut stream = EventStream::new();
        stream.push(0.0, 0, 0, 1);
        stream.push(0.0, 1, 0, -1);

        let opts = RenderOptions {
            polarity_map: Some(PolarityMap { on: 200.0, off: 100.0 }),
            normalize: false,
        };
        let img = accumulate_frame(&stream, geometry(), &opts).unwrap();
        assert_eq!(img.get_pixel(0, 0).0[0], 200);
        assert_eq!(img.get_pixel(1, 0).0[0], 100);
    }

    #[test]
    fn test_repeated_events_accumulate_and_clip() {
        let mut stream = EventStream::new();
        stream.push(0.0, 2, 2, -1);
        stream.push(0.1, 2, 2, -1);
        stream.push(0.2, 2, 2, -1);

        let opts = RenderOptions {
            polarity_map: Some(PolarityMap { on: 200.0, off: 100.0 }),
            normalize: false,
        };
        let img = accumulate_frame(&stream, geometry(), &opts).unwrap();
        // 3 * 100 clipped to the displayable range
        assert_eq!(img.get_pixel(2, 2).0[0], 255);
    }

    #[test]
    fn test_normalization_rescales_to_full_range() {
        let mut stream = EventStream::new();
        stream.push(0.0, 0, 0, 1);
        stream.push(0.1, 0, 0, 1);
        stream.push(0.2, 1, 0, 1);

        let opts = RenderOptions {
            polarity_map: Some(PolarityMap { on: 10.0, off: 10.0 }),
            normalize: true,
        };
        let img = accumulate_frame(&stream, geometry(), &opts).unwrap();
        assert_eq!(img.get_pixel(0, 0).0[0], 255);
        assert_eq!(img.get_pixel(1, 0).0[0], 127);
    }

    #[test]
    fn test_out_of_bounds_event_rejected() {
        let mut stream = EventStream::new();
        stream.push(0.0, 4, 0, 1);

        let result = accumulate_frame(&stream, geometry(), &RenderOptions::default());
        assert_eq!(
            result,
            Err(RenderError::EventOutOfBounds {
                x: 4,
                y: 0,
                width: 4,
                height: 4
            })
        );
    }

    #[test]
    fn test_diff_frames() {
        let mut a = GrayImage::new(2, 2);
        let mut b = GrayImage::new(2, 2);
        a.put_pixel(0, 0, image::Luma([200]));
        b.put_pixel(0, 0, image::Luma([50]));
        b.put_pixel(1, 1, image::Luma([30]));

        let diff = diff_frames(&a, &b).unwrap();
        assert_eq!(diff.get_pixel(0, 0).0[0], 150);
        assert_eq!(diff.get_pixel(1, 1).0[0], 30);
        assert_eq!(diff.get_pixel(0, 1).0[0], 0);

        let stats = diff_stats(&diff).unwrap();
        assert_eq!(stats.changed, 2);
        assert_eq!(stats.max, 150);
        assert_eq!(stats.mean, 90.0);
    }

    #[test]
    fn test_diff_dimension_mismatch() {
        let a = GrayImage::new(2, 2);
        let b = GrayImage::new(3, 2);
        assert_eq!(
            diff_frames(&a, &b),
            Err(RenderError::DimensionMismatch(2, 2, 3, 2))
        );
    }

    #[test]
    fn test_identical_images_have_no_stats() {
        let a = GrayImage::new(2, 2);
        let diff = diff_frames(&a, &a).unwrap();
        assert!(diff_stats(&diff).is_none());
    }
}
