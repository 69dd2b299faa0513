use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Pixel, Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Canvas;
use crate::palette::Palette;

pub const SUPPORTED_TYPES: [&str; 5] = ["bmp", "gif", "jpeg", "jpg", "png"];

/// Menu label and sampling stride for each resolution scale.
pub const RESOLUTION_SCALES: [(&str, u32); 8] = [
    ("1", 1),
    ("1/2", 2),
    ("1/3", 3),
    ("1/4", 4),
    ("1/5", 5),
    ("1/6", 6),
    ("1/8", 8),
    ("1/10", 10),
];

#[derive(Debug)]
pub struct PreparedImage {
    pub image: RgbImage,
    pub stride: u32,
    pub source_size: (u32, u32),
}

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_ascii_lowercase();
            SUPPORTED_TYPES.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Supported images below `dir`, as paths relative to it, sorted.
/// Symlinked directories are not descended into; unreadable entries are skipped.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("image directory not found: {}", dir.display());
    }
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let listing = match fs::read_dir(&current) {
            Ok(listing) => listing,
            Err(err) if current != dir => {
                tracing::warn!(path = %current.display(), %err, "skipping unreadable directory");
                continue;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to list image directory: {}", current.display())
                })
            }
        };
        for entry in listing {
            let (path, file_type) = match entry.and_then(|e| Ok((e.path(), e.file_type()?))) {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(path = %current.display(), %err, "skipping unreadable entry");
                    continue;
                }
            };
            if file_type.is_dir() {
                pending.push(path);
            } else if is_supported(&path) && path.is_file() {
                if let Ok(relative) = path.strip_prefix(dir) {
                    found.push(relative.to_path_buf());
                }
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Drops alpha by compositing over white.
pub fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    let (width, height) = img.dimensions();
    let rgba = img.to_rgba8();
    RgbImage::from_fn(width, height, |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = f32::from(a) / 255.0;
        let over = |c: u8| (f32::from(c) * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        Rgb([over(r), over(g), over(b)])
    })
}

/// Uniform scale that fits the image's larger edge onto the canvas's smaller edge.
pub fn fit_size(canvas: &Canvas, width: u32, height: u32) -> (u32, u32) {
    let largest = width.max(height).max(1);
    let factor = f64::from(canvas.smallest_edge()) / f64::from(largest);
    let scaled = |v: u32| ((f64::from(v) * factor).round() as u32).max(1);
    (scaled(width), scaled(height))
}

/// Replaces the pixels on the stride grid with their nearest palette color.
/// Off-grid pixels are never drawn and stay as they were.
pub fn quantize(image: &mut RgbImage, palette: &Palette, stride: u32) -> Result<()> {
    if palette.is_empty() {
        bail!("palette has no colours; record at least one before drawing");
    }
    let step = stride.max(1) as usize;
    let (width, height) = image.dimensions();
    for x in (0..width).step_by(step) {
        for y in (0..height).step_by(step) {
            let current = image.get_pixel(x, y).to_rgb();
            if let Some(nearest) = palette.nearest(current) {
                image.put_pixel(x, y, nearest);
            }
        }
    }
    Ok(())
}

pub fn prepare_image(
    path: &Path,
    canvas: &Canvas,
    palette: &Palette,
    stride: u32,
) -> Result<PreparedImage> {
    let source = image::open(path)
        .with_context(|| format!("failed to open input image: {}", path.display()))?;
    let source_size = source.dimensions();
    let flattened = flatten_onto_white(&source);

    let (width, height) = fit_size(canvas, source_size.0, source_size.1);
    let mut resized = image::imageops::resize(&flattened, width, height, FilterType::CatmullRom);
    tracing::debug!(
        source_w = source_size.0,
        source_h = source_size.1,
        width,
        height,
        "resized source image"
    );

    quantize(&mut resized, palette, stride)?;
    Ok(PreparedImage {
        image: resized,
        stride: stride.max(1),
        source_size,
    })
}
