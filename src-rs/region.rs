use anyhow::{anyhow, bail, Context, Result};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use minifb::{CursorStyle, Key, MouseButton, MouseMode, Window, WindowOptions};
use thiserror::Error;
use xcap::Monitor;

use crate::config::Canvas;

/// Selections must be strictly larger than this on both axes.
pub const MIN_SELECTION_EDGE: i32 = 10;

const DIM_FACTOR: f32 = 0.35;
const BORDER: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BORDER_THICKNESS: i32 = 2;
const HINT: &str = "Drag over the drawing area. Esc cancels.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegionError {
    #[error("Bbox was too small! ({width}x{height}, need more than {MIN_SELECTION_EDGE}px each way)")]
    TooSmall { width: i32, height: i32 },
}

/// Press/drag/release tracking for a rubber-band rectangle.
#[derive(Debug, Default)]
pub struct RegionSelector {
    begin: Option<(i32, i32)>,
    end: Option<(i32, i32)>,
}

impl RegionSelector {
    pub fn press(&mut self, x: i32, y: i32) {
        self.begin = Some((x, y));
        self.end = Some((x, y));
    }

    pub fn drag(&mut self, x: i32, y: i32) {
        if self.begin.is_some() {
            self.end = Some((x, y));
        }
    }

    pub fn release(&mut self, x: i32, y: i32) -> Option<[i32; 4]> {
        self.drag(x, y);
        let rect = self.rect();
        self.begin = None;
        self.end = None;
        rect
    }

    /// Current selection as `[x1, y1, x2, y2]` with x1 <= x2, y1 <= y2.
    pub fn rect(&self) -> Option<[i32; 4]> {
        let (bx, by) = self.begin?;
        let (ex, ey) = self.end?;
        Some([bx.min(ex), by.min(ey), bx.max(ex), by.max(ey)])
    }
}

pub fn validate_selection(rect: [i32; 4]) -> Result<Canvas, RegionError> {
    let [x1, y1, x2, y2] = rect;
    let width = x2 - x1;
    let height = y2 - y1;
    if width <= MIN_SELECTION_EDGE || height <= MIN_SELECTION_EDGE {
        return Err(RegionError::TooSmall { width, height });
    }
    Canvas::new(x1, y1, x2, y2).map_err(|_| RegionError::TooSmall { width, height })
}

/// Shows the selection overlay until the user drags a large enough rectangle.
pub fn capture_canvas() -> Result<Canvas> {
    capture_canvas_with(run_overlay)
}

/// Asks `next_rect` for selections until one is accepted. Errors from
/// `next_rect` (cancel, closed window) end the capture.
pub fn capture_canvas_with<F>(mut next_rect: F) -> Result<Canvas>
where
    F: FnMut() -> Result<[i32; 4]>,
{
    loop {
        let rect = next_rect()?;
        match validate_selection(rect) {
            Ok(canvas) => {
                tracing::info!(%canvas, "canvas selected");
                return Ok(canvas);
            }
            Err(err) => {
                tracing::debug!(?rect, "selection rejected");
                println!("{err}");
            }
        }
    }
}

fn primary_monitor() -> Result<Monitor> {
    let monitors = Monitor::all().map_err(|err| anyhow!("failed to enumerate monitors: {err}"))?;
    monitors
        .iter()
        .find(|m| m.is_primary())
        .or_else(|| monitors.first())
        .cloned()
        .context("no monitors found")
}

struct Backdrop {
    width: usize,
    height: usize,
    bright: Vec<u32>,
    dimmed: Vec<u32>,
}

impl Backdrop {
    fn from_capture(shot: &RgbaImage, width: u32, height: u32) -> Self {
        let fitted = if shot.dimensions() == (width, height) {
            shot.clone()
        } else {
            image::imageops::resize(shot, width, height, FilterType::Triangle)
        };
        let mut dimmed = fitted.clone();
        for pixel in dimmed.pixels_mut() {
            for channel in pixel.0.iter_mut().take(3) {
                *channel = (f32::from(*channel) * DIM_FACTOR).round() as u8;
            }
        }
        draw_bitmap_text(&mut dimmed, 24, 24, HINT, Rgba([255, 255, 255, 255]), 2);

        Self {
            width: width as usize,
            height: height as usize,
            bright: to_argb(&fitted),
            dimmed: to_argb(&dimmed),
        }
    }

    fn render(&self, selection: Option<[i32; 4]>, frame: &mut [u32]) {
        frame.copy_from_slice(&self.dimmed);
        let Some([x1, y1, x2, y2]) = selection else {
            return;
        };
        let max_x = self.width as i32 - 1;
        let max_y = self.height as i32 - 1;
        let (x1, x2) = (x1.clamp(0, max_x), x2.clamp(0, max_x));
        let (y1, y2) = (y1.clamp(0, max_y), y2.clamp(0, max_y));
        for y in y1..=y2 {
            let row = y as usize * self.width;
            let span = row + x1 as usize..=row + x2 as usize;
            frame[span.clone()].copy_from_slice(&self.bright[span]);
        }
        let border = argb(BORDER);
        for t in 0..BORDER_THICKNESS {
            let (tx1, ty1) = ((x1 - t).max(0), (y1 - t).max(0));
            let (tx2, ty2) = ((x2 + t).min(max_x), (y2 + t).min(max_y));
            for x in tx1..=tx2 {
                frame[ty1 as usize * self.width + x as usize] = border;
                frame[ty2 as usize * self.width + x as usize] = border;
            }
            for y in ty1..=ty2 {
                frame[y as usize * self.width + tx1 as usize] = border;
                frame[y as usize * self.width + tx2 as usize] = border;
            }
        }
    }
}

fn argb(color: Rgba<u8>) -> u32 {
    let [r, g, b, _] = color.0;
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

fn to_argb(img: &RgbaImage) -> Vec<u32> {
    img.pixels().map(|p| argb(*p)).collect()
}

fn draw_bitmap_text(img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>, scale: u32) {
    let scale_i = scale.max(1) as i32;
    let mut cursor_x = x;
    for ch in text.chars() {
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            cursor_x += 8 * scale_i;
            continue;
        };
        for (row_idx, row) in glyph.iter().enumerate() {
            for col_idx in 0..8 {
                if (*row >> col_idx) & 1 == 0 {
                    continue;
                }
                let px = cursor_x + col_idx * scale_i;
                let py = y + row_idx as i32 * scale_i;
                for sy in 0..scale_i {
                    for sx in 0..scale_i {
                        let (tx, ty) = (px + sx, py + sy);
                        if tx >= 0 && ty >= 0 && tx < img.width() as i32 && ty < img.height() as i32
                        {
                            img.put_pixel(tx as u32, ty as u32, color);
                        }
                    }
                }
            }
        }
        cursor_x += 8 * scale_i;
    }
}

/// Returns the dragged rectangle in screen coordinates.
fn run_overlay() -> Result<[i32; 4]> {
    let monitor = primary_monitor()?;
    let (origin_x, origin_y) = (monitor.x(), monitor.y());
    let (width, height) = (monitor.width(), monitor.height());
    let shot = monitor
        .capture_image()
        .map_err(|err| anyhow!("failed to capture screen for the overlay: {err}"))?;
    let backdrop = Backdrop::from_capture(&shot, width, height);

    let mut window = Window::new(
        "autodraw - select canvas",
        backdrop.width,
        backdrop.height,
        WindowOptions {
            borderless: true,
            title: false,
            resize: false,
            topmost: true,
            ..WindowOptions::default()
        },
    )
    .context("failed to open selection overlay")?;
    window.set_position(origin_x as isize, origin_y as isize);
    window.set_cursor_style(CursorStyle::Crosshair);
    window.set_target_fps(60);

    let mut selector = RegionSelector::default();
    let mut frame = vec![0u32; backdrop.width * backdrop.height];
    let mut was_down = false;

    while window.is_open() {
        if window.is_key_down(Key::Escape) {
            bail!("canvas selection cancelled");
        }
        let down = window.get_mouse_down(MouseButton::Left);
        if let Some((mx, my)) = window.get_mouse_pos(MouseMode::Clamp) {
            let (x, y) = (mx.round() as i32, my.round() as i32);
            match (was_down, down) {
                (false, true) => selector.press(x, y),
                (true, true) => selector.drag(x, y),
                (true, false) => {
                    if let Some([x1, y1, x2, y2]) = selector.release(x, y) {
                        return Ok([x1 + origin_x, y1 + origin_y, x2 + origin_x, y2 + origin_y]);
                    }
                }
                (false, false) => {}
            }
        }
        was_down = down;

        backdrop.render(selector.rect(), &mut frame);
        window
            .update_with_buffer(&frame, backdrop.width, backdrop.height)
            .context("failed to draw selection overlay")?;
    }

    bail!("canvas selection window closed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drag_in_any_direction_normalises() {
        let mut selector = RegionSelector::default();
        selector.press(300, 200);
        selector.drag(250, 260);
        assert_eq!(selector.rect(), Some([250, 200, 300, 260]));
        assert_eq!(selector.release(100, 50), Some([100, 50, 300, 200]));
        assert_eq!(selector.rect(), None);
    }

    #[test]
    fn drag_without_press_is_ignored() {
        let mut selector = RegionSelector::default();
        selector.drag(10, 10);
        assert_eq!(selector.release(40, 40), None);
    }

    #[test]
    fn small_selections_are_rejected() {
        assert_eq!(
            validate_selection([0, 0, 10, 200]),
            Err(RegionError::TooSmall {
                width: 10,
                height: 200
            })
        );
        assert!(validate_selection([0, 0, 200, 10]).is_err());
        assert!(validate_selection([5, 5, 5, 5]).is_err());
        assert_eq!(
            validate_selection([0, 0, 11, 11]),
            Ok(Canvas::new(0, 0, 11, 11).unwrap())
        );
    }

    #[test]
    fn rejected_selection_asks_again() {
        let mut queued = vec![[0, 0, 50, 50], [0, 0, 10, 200]];
        let mut calls = 0;
        let canvas = capture_canvas_with(|| {
            calls += 1;
            queued.pop().context("no more selections")
        })
        .unwrap();
        assert_eq!(calls, 2);
        assert_eq!(canvas, Canvas::new(0, 0, 50, 50).unwrap());
    }

    #[test]
    fn cancelled_selection_ends_capture() {
        let mut queued = vec![[3, 3, 4, 4]];
        let err = capture_canvas_with(|| match queued.pop() {
            Some(rect) => Ok(rect),
            None => bail!("canvas selection cancelled"),
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "canvas selection cancelled");
        assert!(queued.is_empty());
    }

    #[test]
    fn render_brightens_selection_and_draws_border() {
        let shot = RgbaImage::from_pixel(40, 30, Rgba([200, 100, 40, 255]));
        let backdrop = Backdrop::from_capture(&shot, 40, 30);
        let mut frame = vec![0u32; 40 * 30];

        backdrop.render(None, &mut frame);
        assert_eq!(frame[39], argb(Rgba([70, 35, 14, 255])));

        backdrop.render(Some([10, 10, 30, 20]), &mut frame);
        assert_eq!(frame[15 * 40 + 20], argb(Rgba([200, 100, 40, 255])));
        assert_eq!(frame[10 * 40 + 20], argb(BORDER));
        assert_eq!(frame[9 * 40 + 20], argb(BORDER));
        assert_eq!(frame[8 * 40 + 20], argb(Rgba([70, 35, 14, 255])));
    }

    #[test]
    fn backdrop_resamples_physical_captures() {
        let shot = RgbaImage::from_pixel(80, 60, Rgba([1, 2, 3, 255]));
        let backdrop = Backdrop::from_capture(&shot, 40, 30);
        assert_eq!(backdrop.bright.len(), 40 * 30);
        assert_eq!(backdrop.bright[0], argb(Rgba([1, 2, 3, 255])));
    }
}
