//! Presenter: consumes the particle buffer once per frame.
//!
//! The simulation hands out a borrowed [`ParticleView`] that is only valid
//! for the duration of [`Presenter::present`]. Rendering backends implement
//! this trait; [`StatsPresenter`] summarizes the frame into the log.

use fluidsim_kernel::ParticleView;

use crate::simulation::FrameReport;

/// Viewport state shared with the presenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenterContext {
    /// Viewport width in pixels.
    pub width: u32,
    /// Viewport height in pixels.
    pub height: u32,
}

impl PresenterContext {
    /// Width over height, 1.0 for a degenerate viewport.
    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Consumer of per-frame particle state.
pub trait Presenter {
    /// Prepare for the first frame.
    fn init(&mut self, ctx: &PresenterContext);

    /// Consume one frame. `particles` must not be retained.
    fn present(&mut self, ctx: &PresenterContext, particles: ParticleView<'_>, report: &FrameReport);

    /// The viewport changed size.
    fn on_resize(&mut self, ctx: &PresenterContext);

    /// Release presenter resources.
    fn cleanup(&mut self) {}
}

/// Summary of one frame's particle state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// Componentwise minimum position.
    pub bbox_min: [f32; 3],
    /// Componentwise maximum position.
    pub bbox_max: [f32; 3],
    /// Mean particle speed.
    pub mean_speed: f32,
    /// Mean particle density.
    pub mean_density: f32,
    /// Largest neighbor count.
    pub max_neighbors: u32,
}

impl FrameStats {
    /// Summarize `particles`; `None` for an empty view.
    pub fn compute(particles: ParticleView<'_>) -> Option<Self> {
        let slice = particles.particles();
        if slice.is_empty() {
            return None;
        }

        let mut bbox_min = [f32::INFINITY; 3];
        let mut bbox_max = [f32::NEG_INFINITY; 3];
        let mut speed_sum = 0.0f64;
        let mut density_sum = 0.0f64;
        let mut max_neighbors = 0u32;

        for p in slice {
            let pos = p.pos();
            for k in 0..3 {
                bbox_min[k] = bbox_min[k].min(pos[k]);
                bbox_max[k] = bbox_max[k].max(pos[k]);
            }
            let v = p.vel();
            speed_sum += f64::from((v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt());
            density_sum += f64::from(p.density());
            max_neighbors = max_neighbors.max(p.neighbor_count());
        }

        let n = slice.len() as f64;
        Some(Self {
            bbox_min,
            bbox_max,
            mean_speed: (speed_sum / n) as f32,
            mean_density: (density_sum / n) as f32,
            max_neighbors,
        })
    }
}

/// Presenter that logs frame statistics instead of drawing.
///
/// Every frame is logged at debug level; every `info_every` frames also at
/// info level.
#[derive(Debug, Clone)]
pub struct StatsPresenter {
    info_every: u64,
    frames: u64,
    viewport: Option<PresenterContext>,
    last: Option<FrameStats>,
}

impl Default for StatsPresenter {
    fn default() -> Self {
        Self::new(60)
    }
}

impl StatsPresenter {
    /// Presenter logging at info level every `info_every` frames.
    pub fn new(info_every: u64) -> Self {
        Self {
            info_every: info_every.max(1),
            frames: 0,
            viewport: None,
            last: None,
        }
    }

    /// Frames presented so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Statistics of the most recent frame.
    pub fn last_stats(&self) -> Option<FrameStats> {
        self.last
    }

    /// Current viewport, once initialized.
    pub fn viewport(&self) -> Option<PresenterContext> {
        self.viewport
    }
}

impl Presenter for StatsPresenter {
    fn init(&mut self, ctx: &PresenterContext) {
        self.viewport = Some(*ctx);
        tracing::debug!(width = ctx.width, height = ctx.height, "stats presenter ready");
    }

    fn present(&mut self, _ctx: &PresenterContext, particles: ParticleView<'_>, report: &FrameReport) {
        self.frames += 1;
        self.last = FrameStats::compute(particles);

        let Some(stats) = self.last else {
            return;
        };
        tracing::debug!(
            frame = self.frames,
            steps = report.steps,
            mean_speed = stats.mean_speed,
            mean_density = stats.mean_density,
            max_neighbors = stats.max_neighbors,
            "frame"
        );
        if self.frames % self.info_every == 0 {
            tracing::info!(
                "Frame {}: t={:.3}s, bbox {:?}..{:?}, mean speed {:.4}, mean density {:.3}, max neighbors {}",
                self.frames,
                report.simulated_time.as_secs_f64(),
                stats.bbox_min,
                stats.bbox_max,
                stats.mean_speed,
                stats.mean_density,
                stats.max_neighbors,
            );
        }
    }

    fn on_resize(&mut self, ctx: &PresenterContext) {
        self.viewport = Some(*ctx);
        tracing::debug!(width = ctx.width, height = ctx.height, aspect = ctx.aspect(), "viewport resized");
    }

    fn cleanup(&mut self) {
        tracing::debug!(frames = self.frames, "stats presenter cleaned up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluidsim_kernel::Particle;

    #[test]
    fn stats_cover_all_particles() {
        let particles = [
            Particle::at([-0.5, 0.0, 0.25]).with_velocity([3.0, 4.0, 0.0]),
            Particle::at([0.5, 1.0, -0.25]),
        ];
        let stats = FrameStats::compute(ParticleView::new(&particles)).unwrap();
        assert_eq!(stats.bbox_min, [-0.5, 0.0, -0.25]);
        assert_eq!(stats.bbox_max, [0.5, 1.0, 0.25]);
        assert!((stats.mean_speed - 2.5).abs() < 1e-6);
        assert_eq!(stats.max_neighbors, 0);
    }

    #[test]
    fn empty_view_has_no_stats() {
        assert!(FrameStats::compute(ParticleView::new(&[])).is_none());
    }

    #[test]
    fn presenter_tracks_viewport_and_frames() {
        let mut presenter = StatsPresenter::new(1);
        let ctx = PresenterContext { width: 800, height: 600 };
        presenter.init(&ctx);

        let particles = [Particle::at([0.0; 3])];
        presenter.present(&ctx, ParticleView::new(&particles), &FrameReport::default());
        assert_eq!(presenter.frames(), 1);
        assert!(presenter.last_stats().is_some());

        let resized = PresenterContext { width: 400, height: 400 };
        presenter.on_resize(&resized);
        assert_eq!(presenter.viewport(), Some(resized));
        assert_eq!(resized.aspect(), 1.0);
    }
}
