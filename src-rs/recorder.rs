use anyhow::{anyhow, Context, Result};
use image::{Pixel, Rgb};
use xcap::Monitor;

use crate::input::PointerEvent;
use crate::palette::{format_key, hex, Palette, PaletteError, ScreenPoint};

pub trait ScreenSampler {
    fn sample(&mut self, point: ScreenPoint) -> Result<Rgb<u8>>;
}

/// Reads a pixel from a fresh capture of the monitor under the point.
pub struct XcapSampler;

impl ScreenSampler for XcapSampler {
    fn sample(&mut self, point: ScreenPoint) -> Result<Rgb<u8>> {
        let monitor = Monitor::from_point(point.x, point.y)
            .map_err(|err| anyhow!("no monitor contains {point}: {err}"))?;
        let shot = monitor.capture_image().map_err(|err| {
            anyhow!("failed to capture screen; check screen recording permissions: {err}")
        })?;
        let (ix, iy) = monitor_to_image(
            point,
            (monitor.x(), monitor.y()),
            (monitor.width(), monitor.height()),
            shot.dimensions(),
        );
        let pixel = shot
            .get_pixel_checked(ix, iy)
            .with_context(|| format!("{point} is outside the captured screen"))?;
        Ok(pixel.to_rgb())
    }
}

/// Screen coordinates are logical; captures may be in physical pixels.
fn monitor_to_image(
    point: ScreenPoint,
    origin: (i32, i32),
    logical: (u32, u32),
    physical: (u32, u32),
) -> (u32, u32) {
    let scale_x = f64::from(physical.0) / f64::from(logical.0.max(1));
    let scale_y = f64::from(physical.1) / f64::from(logical.1.max(1));
    let lx = f64::from((point.x - origin.0).max(0));
    let ly = f64::from((point.y - origin.1).max(0));
    ((lx * scale_x).floor() as u32, (ly * scale_y).floor() as u32)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStep {
    Added { color: Rgb<u8>, point: ScreenPoint },
    Duplicate { color: Rgb<u8>, existing: ScreenPoint },
    NeedsColour,
    Finished,
}

#[derive(Debug, Default)]
pub struct PaletteRecorder {
    palette: Palette,
}

impl PaletteRecorder {
    pub fn handle<S: ScreenSampler>(
        &mut self,
        event: PointerEvent,
        sampler: &mut S,
    ) -> Result<RecordStep> {
        match event {
            PointerEvent::LeftRelease(point) => {
                let color = sampler.sample(point)?;
                match self.palette.insert(color, point) {
                    Ok(()) => Ok(RecordStep::Added { color, point }),
                    Err(PaletteError::Duplicate { existing, .. }) => {
                        Ok(RecordStep::Duplicate { color, existing })
                    }
                    Err(err) => Err(err.into()),
                }
            }
            PointerEvent::RightRelease(_) if self.palette.is_empty() => Ok(RecordStep::NeedsColour),
            PointerEvent::RightRelease(_) => Ok(RecordStep::Finished),
        }
    }

    pub fn into_palette(self) -> Palette {
        self.palette
    }
}

/// Left clicks add the color under the cursor, a right click finishes once
/// at least one color is recorded.
pub fn record_palette<S, F>(mut next_event: F, sampler: &mut S) -> Result<Palette>
where
    S: ScreenSampler,
    F: FnMut() -> Result<PointerEvent>,
{
    let mut recorder = PaletteRecorder::default();
    loop {
        let event = next_event()?;
        match recorder.handle(event, sampler) {
            Ok(RecordStep::Added { color, point }) => {
                tracing::info!(colour = %hex(color), %point, "palette colour recorded");
                println!("Added colour {} at position {point}", hex(color));
            }
            Ok(RecordStep::Duplicate { color, existing }) => {
                println!("Colour {} already exists at {existing}", format_key(color));
            }
            Ok(RecordStep::NeedsColour) => {
                println!("Please choose at least 1 colour before continuing");
            }
            Ok(RecordStep::Finished) => return Ok(recorder.into_palette()),
            Err(err) => {
                tracing::debug!(error = %format!("{err:#}"), "could not sample colour");
                println!("Could not read that colour: {err:#}");
            }
        }
    }
}
