use image::{Rgb, RgbImage};
use thiserror::Error;

use crate::config::Canvas;
use crate::palette::{format_key, Palette, ScreenPoint};

/// Pixels past the canvas's far edges that are still accepted.
pub const BOUNDS_TOLERANCE: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    MoveTo(ScreenPoint),
    Press,
    Release,
    Pause,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClickPathError {
    #[error("point {point} falls outside canvas {canvas}")]
    OutOfBounds { point: ScreenPoint, canvas: Canvas },
    #[error("colour {0} has no palette position")]
    UnknownColour(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PathSummary {
    pub moves: usize,
    pub presses: usize,
    pub releases: usize,
    pub pauses: usize,
}

impl PathSummary {
    pub fn of(actions: &[MouseAction]) -> Self {
        let mut summary = Self::default();
        for action in actions {
            match action {
                MouseAction::MoveTo(_) => summary.moves += 1,
                MouseAction::Press => summary.presses += 1,
                MouseAction::Release => summary.releases += 1,
                MouseAction::Pause => summary.pauses += 1,
            }
        }
        summary
    }
}

fn palette_point(palette: &Palette, color: Rgb<u8>) -> Result<ScreenPoint, ClickPathError> {
    palette
        .get(color)
        .ok_or_else(|| ClickPathError::UnknownColour(format_key(color)))
}

fn select_colour(actions: &mut Vec<MouseAction>, point: ScreenPoint) {
    actions.extend([
        MouseAction::MoveTo(point),
        MouseAction::Pause,
        MouseAction::Press,
        MouseAction::Release,
        MouseAction::Pause,
    ]);
}

/// Builds the full mouse script for a quantized image. Each sampled row
/// arms the color of its first pixel, then drags across runs of equal color
/// and only releases to switch colors. Every canvas point is checked before
/// anything is returned, so a failing image never moves the mouse.
pub fn synthesize(
    image: &RgbImage,
    stride: u32,
    canvas: &Canvas,
    palette: &Palette,
) -> Result<Vec<MouseAction>, ClickPathError> {
    let (width, height) = image.dimensions();
    let mut actions = Vec::new();
    if width == 0 || height == 0 {
        return Ok(actions);
    }
    let step = stride.max(1);

    for y in (0..height).step_by(step as usize) {
        let first = *image.get_pixel(0, y);
        select_colour(&mut actions, palette_point(palette, first)?);

        let mut held = false;
        for x in (0..width).step_by(step as usize) {
            let point = ScreenPoint::new(canvas.x1 + x as i32, canvas.y1 + y as i32);
            if !canvas.accepts(point, BOUNDS_TOLERANCE) {
                return Err(ClickPathError::OutOfBounds {
                    point,
                    canvas: *canvas,
                });
            }
            actions.push(MouseAction::MoveTo(point));
            if !held {
                actions.push(MouseAction::Press);
                held = true;
            }

            let next_x = x + step;
            if next_x >= width {
                continue;
            }
            let next = *image.get_pixel(next_x, y);
            if *image.get_pixel(x, y) != next {
                actions.extend([MouseAction::Pause, MouseAction::Release]);
                held = false;
                select_colour(&mut actions, palette_point(palette, next)?);
            }
        }

        actions.extend([MouseAction::Pause, MouseAction::Release]);
    }

    actions.push(MouseAction::Release);
    Ok(actions)
}
