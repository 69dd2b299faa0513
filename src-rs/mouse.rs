use anyhow::{Context, Result};
use enigo::{Button, Coordinate, Direction, Enigo, Mouse, Settings};
use std::thread;
use std::time::Duration;

use crate::click_path::MouseAction;
use crate::palette::ScreenPoint;

pub trait MouseDriver {
    fn move_to(&mut self, point: ScreenPoint) -> Result<()>;
    fn press(&mut self) -> Result<()>;
    fn release(&mut self) -> Result<()>;
}

pub struct EnigoDriver {
    enigo: Enigo,
}

impl EnigoDriver {
    pub fn new() -> Result<Self> {
        let enigo = Enigo::new(&Settings::default())
            .context("failed to connect to the OS input system")?;
        Ok(Self { enigo })
    }
}

impl MouseDriver for EnigoDriver {
    fn move_to(&mut self, point: ScreenPoint) -> Result<()> {
        self.enigo
            .move_mouse(point.x, point.y, Coordinate::Abs)
            .with_context(|| format!("failed to move mouse to {point}"))
    }

    fn press(&mut self) -> Result<()> {
        self.enigo
            .button(Button::Left, Direction::Press)
            .context("failed to press left button")
    }

    fn release(&mut self) -> Result<()> {
        self.enigo
            .button(Button::Left, Direction::Release)
            .context("failed to release left button")
    }
}

/// Best effort release so an aborted run never leaves the button held.
pub fn release_left_button() {
    match EnigoDriver::new() {
        Ok(mut driver) => {
            if let Err(err) = driver.release() {
                tracing::warn!(error = %format!("{err:#}"), "could not release left button");
            }
        }
        Err(err) => tracing::warn!(error = %format!("{err:#}"), "could not reach input system"),
    }
}

/// Sends the actions strictly in order, sleeping `interval` on every pause.
pub fn replay<D: MouseDriver>(
    actions: &[MouseAction],
    driver: &mut D,
    interval: Duration,
) -> Result<()> {
    for (index, action) in actions.iter().enumerate() {
        let step = match action {
            MouseAction::MoveTo(point) => driver.move_to(*point),
            MouseAction::Press => driver.press(),
            MouseAction::Release => driver.release(),
            MouseAction::Pause => {
                thread::sleep(interval);
                Ok(())
            }
        };
        if let Err(err) = step {
            let _ = driver.release();
            return Err(err.context(format!("replay stopped at action {index}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[derive(Default)]
    struct Recorder {
        log: Vec<String>,
        fail_on_press: bool,
    }

    impl MouseDriver for Recorder {
        fn move_to(&mut self, point: ScreenPoint) -> Result<()> {
            self.log.push(format!("move {point}"));
            Ok(())
        }

        fn press(&mut self) -> Result<()> {
            if self.fail_on_press {
                bail!("device gone");
            }
            self.log.push("press".to_string());
            Ok(())
        }

        fn release(&mut self) -> Result<()> {
            self.log.push("release".to_string());
            Ok(())
        }
    }

    #[test]
    fn replays_in_order_and_skips_pauses() {
        let mut driver = Recorder::default();
        replay(
            &[
                MouseAction::MoveTo(ScreenPoint::new(3, 4)),
                MouseAction::Pause,
                MouseAction::Press,
                MouseAction::MoveTo(ScreenPoint::new(5, 4)),
                MouseAction::Release,
            ],
            &mut driver,
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(
            driver.log,
            vec!["move (3, 4)", "press", "move (5, 4)", "release"]
        );
    }

    #[test]
    fn failure_releases_button_and_reports_position() {
        let mut driver = Recorder {
            fail_on_press: true,
            ..Recorder::default()
        };
        let err = replay(
            &[MouseAction::MoveTo(ScreenPoint::new(1, 1)), MouseAction::Press],
            &mut driver,
            Duration::ZERO,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("replay stopped at action 1"));
        assert_eq!(driver.log, vec!["move (1, 1)", "release"]);
    }
}
