//! Display surface abstraction.
//!
//! The application loop only needs a handful of things from a window: create
//! it, drain its input events, know when to stop, present a frame and read a
//! clock. [`HeadlessSurface`] implements this without a window for batch runs
//! and tests.

use std::fmt;
use std::time::{Duration, Instant};

use crate::config::WindowConfig;

/// A surface could not be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceError(pub String);

impl fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface creation failed: {}", self.0)
    }
}

impl std::error::Error for SurfaceError {}

/// Input events the application loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// Drawable area changed size.
    Resized {
        /// New width in pixels.
        width: u32,
        /// New height in pixels.
        height: u32,
    },
    /// The user asked to close the surface.
    CloseRequested,
}

/// Window-like target the application loop drives.
pub trait DisplaySurface {
    /// Open the surface described by `window`.
    fn create_surface(&mut self, window: &WindowConfig) -> Result<(), SurfaceError>;

    /// Drain pending input events.
    fn poll_input(&mut self) -> Vec<SurfaceEvent>;

    /// Whether the loop should stop.
    fn should_terminate(&self) -> bool;

    /// Finish the current frame.
    fn present_frame(&mut self);

    /// Current time as seen by this surface.
    fn now(&self) -> Instant;

    /// Close the surface. Called once after the loop, even on error.
    fn destroy(&mut self) {}
}

/// Surface with no window: counts frames and terminates after a bound.
///
/// By default `now` is the wall clock. With [`HeadlessSurface::with_frame_interval`]
/// time advances by a fixed amount per presented frame instead, which makes
/// step counts reproducible.
#[derive(Debug)]
pub struct HeadlessSurface {
    max_frames: Option<u64>,
    frames: u64,
    frame_interval: Option<Duration>,
    epoch: Instant,
    size: (u32, u32),
    pending: Vec<SurfaceEvent>,
    created: bool,
    closed: bool,
}

impl HeadlessSurface {
    /// Headless surface that stops after `max_frames` frames (or never).
    pub fn new(max_frames: Option<u64>) -> Self {
        Self {
            max_frames,
            frames: 0,
            frame_interval: None,
            epoch: Instant::now(),
            size: (0, 0),
            pending: Vec::new(),
            created: false,
            closed: false,
        }
    }

    /// Advance the surface clock by `interval` per presented frame.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Queue an event for the next `poll_input`.
    pub fn push_event(&mut self, event: SurfaceEvent) {
        self.pending.push(event);
    }

    /// Frames presented so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Current surface size in pixels.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Whether `create_surface` succeeded and `destroy` has not run yet.
    pub fn is_open(&self) -> bool {
        self.created
    }
}

impl DisplaySurface for HeadlessSurface {
    fn create_surface(&mut self, window: &WindowConfig) -> Result<(), SurfaceError> {
        if window.width == 0 || window.height == 0 {
            return Err(SurfaceError(format!(
                "invalid size {}x{}",
                window.width, window.height
            )));
        }
        self.size = (window.width, window.height);
        self.created = true;
        self.epoch = Instant::now();
        tracing::debug!(
            title = %window.title,
            width = window.width,
            height = window.height,
            "headless surface created"
        );
        Ok(())
    }

    fn poll_input(&mut self) -> Vec<SurfaceEvent> {
        let events = std::mem::take(&mut self.pending);
        for event in &events {
            match *event {
                SurfaceEvent::Resized { width, height } => self.size = (width, height),
                SurfaceEvent::CloseRequested => self.closed = true,
            }
        }
        events
    }

    fn should_terminate(&self) -> bool {
        self.closed || self.max_frames.is_some_and(|max| self.frames >= max)
    }

    fn present_frame(&mut self) {
        self.frames += 1;
    }

    fn now(&self) -> Instant {
        match self.frame_interval {
            Some(interval) => {
                let frames = u32::try_from(self.frames).unwrap_or(u32::MAX);
                self.epoch + interval * frames
            }
            None => Instant::now(),
        }
    }

    fn destroy(&mut self) {
        if self.created {
            tracing::debug!(frames = self.frames, "headless surface destroyed");
        }
        self.created = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminates_after_max_frames() {
        let mut surface = HeadlessSurface::new(Some(2));
        surface.create_surface(&WindowConfig::default()).unwrap();
        assert!(!surface.should_terminate());
        surface.present_frame();
        assert!(!surface.should_terminate());
        surface.present_frame();
        assert!(surface.should_terminate());
    }

    #[test]
    fn close_event_terminates() {
        let mut surface = HeadlessSurface::new(None);
        surface.create_surface(&WindowConfig::default()).unwrap();
        surface.push_event(SurfaceEvent::Resized { width: 320, height: 200 });
        surface.push_event(SurfaceEvent::CloseRequested);

        let events = surface.poll_input();
        assert_eq!(events.len(), 2);
        assert_eq!(surface.size(), (320, 200));
        assert!(surface.should_terminate());
        assert!(surface.poll_input().is_empty());
    }

    #[test]
    fn fixed_interval_clock_advances_per_frame() {
        let mut surface = HeadlessSurface::new(None).with_frame_interval(Duration::from_millis(10));
        surface.create_surface(&WindowConfig::default()).unwrap();
        let t0 = surface.now();
        surface.present_frame();
        surface.present_frame();
        assert_eq!(surface.now() - t0, Duration::from_millis(20));
    }

    #[test]
    fn zero_size_window_is_rejected() {
        let mut surface = HeadlessSurface::new(Some(1));
        let window = WindowConfig {
            width: 0,
            ..WindowConfig::default()
        };
        assert!(surface.create_surface(&window).is_err());
        assert!(!surface.is_open());
    }
}
