use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use rdev::{Button, Event, EventType, Key};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::palette::ScreenPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEvent {
    LeftRelease(ScreenPoint),
    RightRelease(ScreenPoint),
}

/// Button events carry no position, so the last reported move stands in.
#[derive(Debug, Default)]
struct PointerTracker {
    last: Option<(f64, f64)>,
}

impl PointerTracker {
    fn observe(&mut self, event: &EventType) -> Option<PointerEvent> {
        match event {
            EventType::MouseMove { x, y } => {
                self.last = Some((*x, *y));
                None
            }
            EventType::ButtonRelease(button) => {
                let (x, y) = self.last?;
                let point = ScreenPoint::new(x.round() as i32, y.round() as i32);
                match button {
                    Button::Left => Some(PointerEvent::LeftRelease(point)),
                    Button::Right => Some(PointerEvent::RightRelease(point)),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// State shared between the hook thread and the hub.
#[derive(Debug)]
struct Shared {
    subscriber: Mutex<Option<Sender<PointerEvent>>>,
    alive: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            subscriber: Mutex::new(None),
            alive: AtomicBool::new(true),
        }
    }

    fn forward(&self, pointer: PointerEvent) {
        let mut guard = self.subscriber.lock();
        let disconnected = guard
            .as_ref()
            .map(|tx| tx.send(pointer).is_err())
            .unwrap_or(false);
        if disconnected {
            *guard = None;
        }
    }

    /// Drops the subscriber's sender so a blocked `recv` wakes with an error.
    fn shut_down(&self) {
        self.alive.store(false, Ordering::SeqCst);
        *self.subscriber.lock() = None;
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Owner of the single global input hook. The hook thread watches for the
/// killswitch and forwards pointer releases to the current subscriber.
pub struct InputHub {
    shared: Arc<Shared>,
}

impl InputHub {
    pub fn start(killswitch: Key) -> Result<Self> {
        let shared = Arc::new(Shared::new());
        let hook_shared = Arc::clone(&shared);
        let thread_shared = Arc::clone(&shared);

        thread::Builder::new()
            .name("input-hook".to_string())
            .spawn(move || {
                let mut tracker = PointerTracker::default();
                let outcome = rdev::listen(move |event: Event| {
                    if event.event_type == EventType::KeyRelease(killswitch) {
                        abort_process(killswitch);
                    }
                    if let Some(pointer) = tracker.observe(&event.event_type) {
                        hook_shared.forward(pointer);
                    }
                });
                if let Err(err) = outcome {
                    tracing::error!(?err, "global input hook stopped; killswitch is inactive");
                }
                thread_shared.shut_down();
            })
            .context("failed to start input hook thread")?;

        println!("Killswitch enabled ({killswitch:?})");
        Ok(Self { shared })
    }

    /// Fails once the hook thread has stopped, which also disables the killswitch.
    pub fn ensure_alive(&self) -> Result<()> {
        if !self.shared.is_alive() {
            bail!("global input hook is not running; killswitch and click recording are unavailable");
        }
        Ok(())
    }

    /// Routes pointer releases to the returned subscription until it drops.
    pub fn subscribe(&self) -> Result<Subscription> {
        let mut slot = self.shared.subscriber.lock();
        self.ensure_alive()?;
        let (tx, rx) = mpsc::channel();
        *slot = Some(tx);
        drop(slot);
        Ok(Subscription {
            receiver: rx,
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct Subscription {
    receiver: Receiver<PointerEvent>,
    shared: Arc<Shared>,
}

impl Subscription {
    pub fn recv(&self) -> Result<PointerEvent> {
        self.receiver
            .recv()
            .map_err(|_| anyhow!("global input hook is not running"))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        *self.shared.subscriber.lock() = None;
    }
}

fn abort_process(key: Key) -> ! {
    println!("Closing program");
    tracing::warn!(?key, "killswitch pressed");
    crate::mouse::release_left_button();
    std::process::exit(130);
}

pub fn parse_killswitch(raw: &str) -> Result<Key, String> {
    let key = match raw.trim().to_ascii_lowercase().as_str() {
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        "esc" | "escape" => Key::Escape,
        "pause" => Key::Pause,
        "scrolllock" | "scroll-lock" => Key::ScrollLock,
        other => {
            return Err(format!(
                "unsupported killswitch key `{other}` (use F1-F12, Escape, Pause or ScrollLock)"
            ))
        }
    };
    Ok(key)
}
