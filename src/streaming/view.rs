//! Multi-pass streaming view
//!
//! A frame is rendered as a sequence of passes. Each call to
//! [`StreamingView::still_render`] runs exactly one pass:
//!
//! 1. prepare: detect camera motion and decide between starting a new sweep
//!    (clear, optionally refine/coarsen, rank pieces) and continuing the
//!    current one
//! 2. update: every visible representation picks its next piece
//! 3. render: one draw into the back buffer
//! 4. finalize: collect completion flags and present if the show-on policy
//!    allows
//!
//! The back buffer is only cleared when a sweep starts, so the passes of a
//! sweep accumulate on screen.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crate::core::time::{PassTimer, PassTimings};
use crate::math::Frustum;
use crate::streaming::display::{DisplaySurface, RenderItem, SurfaceEvents};
use crate::streaming::options::{RefinementMode, ShowOn, StreamOptions};
use crate::streaming::priority::ViewSnapshot;
use crate::streaming::representation::StreamingRepresentation;

/// Still renders may advance refinement on their own; interactive ones never do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderKind {
    Still,
    Interactive,
}

/// One-shot request applied at the start of the next sweep
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Refine,
    Coarsen,
    Restart,
}

/// Outcome of one pass
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PassReport {
    /// Pass number within the sweep, 0 for the first
    pub pass: u32,
    pub restarted: bool,
    pub camera_changed: bool,
    pub wend_done: bool,
    pub display_done: bool,
    pub presented: bool,
    /// The surface asked for another render while this one was running
    pub render_requested: bool,
    /// Render items drawn this pass
    pub items: usize,
    pub cache_hits: usize,
    pub render_time: Duration,
}

struct Slot {
    rep: Box<dyn StreamingRepresentation>,
    visible: bool,
    /// Contributes to the current pass
    drawn: bool,
}

/// Clears the in-progress flag on every exit path
struct RenderGuard(Rc<Cell<bool>>);

impl RenderGuard {
    fn acquire(flag: &Rc<Cell<bool>>) -> Option<Self> {
        if flag.replace(true) {
            return None;
        }
        Some(Self(Rc::clone(flag)))
    }
}

impl Drop for RenderGuard {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Schedules streaming representations over a display surface
pub struct StreamingView<D: DisplaySurface> {
    options: Arc<StreamOptions>,
    surface: D,
    slots: Vec<Slot>,
    view: Option<ViewSnapshot>,
    pass: u32,
    wend_done: bool,
    display_done: bool,
    pending: Option<Command>,
    refinement_mode: RefinementMode,
    render_in_progress: Rc<Cell<bool>>,
    timer: PassTimer,
}

impl<D: DisplaySurface> StreamingView<D> {
    pub fn new(surface: D, options: Arc<StreamOptions>) -> Self {
        let options = StreamOptions::sanitize_shared(&options);
        Self {
            refinement_mode: options.refinement_mode,
            options,
            surface,
            slots: Vec::new(),
            view: None,
            pass: 0,
            wend_done: false,
            display_done: false,
            pending: None,
            render_in_progress: Rc::new(Cell::new(false)),
            timer: PassTimer::default(),
        }
    }

    /// Register a representation. Returns its index.
    pub fn add_representation(&mut self, mut rep: Box<dyn StreamingRepresentation>) -> usize {
        rep.apply_options(&self.options);
        log::debug!("Added representation '{}'", rep.name());
        self.slots.push(Slot {
            rep,
            visible: true,
            drawn: false,
        });
        self.request(Command::Restart);
        self.slots.len() - 1
    }

    pub fn representation_count(&self) -> usize {
        self.slots.len()
    }

    pub fn representation(&self, index: usize) -> Option<&dyn StreamingRepresentation> {
        self.slots.get(index).map(|s| s.rep.as_ref())
    }

    pub fn representation_mut(&mut self, index: usize) -> Option<&mut (dyn StreamingRepresentation + 'static)> {
        self.slots.get_mut(index).map(|s| s.rep.as_mut())
    }

    pub fn surface(&self) -> &D {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut D {
        &mut self.surface
    }

    pub fn options(&self) -> &Arc<StreamOptions> {
        &self.options
    }

    /// Hand the view a new options snapshot; every representation picks it up
    pub fn set_options(&mut self, options: Arc<StreamOptions>) {
        let options = StreamOptions::sanitize_shared(&options);
        for slot in &mut self.slots {
            slot.rep.apply_options(&options);
        }
        self.refinement_mode = options.refinement_mode;
        self.options = options;
        self.request(Command::Restart);
    }

    pub fn refinement_mode(&self) -> RefinementMode {
        self.refinement_mode
    }

    pub fn set_refinement_mode(&mut self, mode: RefinementMode) {
        self.refinement_mode = mode;
    }

    /// Last camera and frustum seen by the view
    pub fn view(&self) -> Option<&ViewSnapshot> {
        self.view.as_ref()
    }

    /// Pass number within the current sweep
    pub fn pass(&self) -> u32 {
        self.pass
    }

    pub fn is_wend_done(&self) -> bool {
        self.wend_done
    }

    pub fn is_display_done(&self) -> bool {
        self.display_done
    }

    pub fn is_rendering(&self) -> bool {
        self.render_in_progress.get()
    }

    pub fn timings(&self) -> PassTimings {
        self.timer.timings()
    }

    /// Refine every visible representation at the start of the next sweep
    pub fn refine(&mut self) {
        self.request(Command::Refine);
    }

    /// Coarsen every visible representation at the start of the next sweep
    pub fn coarsen(&mut self) {
        self.request(Command::Coarsen);
    }

    pub fn set_locked(&mut self, index: usize, locked: bool) {
        if let Some(slot) = self.slots.get_mut(index) {
            if slot.rep.is_locked() != locked {
                slot.rep.set_locked(locked);
                self.request(Command::Restart);
            }
        }
    }

    pub fn set_visible(&mut self, index: usize, visible: bool) {
        if let Some(slot) = self.slots.get_mut(index) {
            if slot.visible != visible {
                slot.visible = visible;
                self.request(Command::Restart);
            }
        }
    }

    /// Stop automatic passes: switch to manual refinement and mark the
    /// display done
    pub fn interrupt(&mut self) {
        log::debug!("Streaming interrupted after pass {}", self.pass);
        self.refinement_mode = RefinementMode::Manual;
        self.display_done = true;
    }

    fn request(&mut self, command: Command) {
        // Explicit refine/coarsen wins over a plain restart
        match (self.pending, command) {
            (Some(Command::Refine | Command::Coarsen), Command::Restart) => {}
            _ => self.pending = Some(command),
        }
    }

    /// Run one pass with automatic refinement allowed.
    /// Returns `None` if a render is already in progress.
    pub fn still_render(&mut self) -> Option<PassReport> {
        self.render(RenderKind::Still)
    }

    /// Run one pass while the user is interacting
    pub fn interactive_render(&mut self) -> Option<PassReport> {
        self.render(RenderKind::Interactive)
    }

    /// Still-render until the display is done or `max_passes` ran.
    /// Returns the number of passes rendered.
    pub fn render_until_done(&mut self, max_passes: usize) -> usize {
        for n in 1..=max_passes {
            match self.still_render() {
                Some(report) if report.display_done => return n,
                Some(_) => {}
                None => return n - 1,
            }
        }
        max_passes
    }

    pub fn render(&mut self, kind: RenderKind) -> Option<PassReport> {
        let Some(_guard) = RenderGuard::acquire(&self.render_in_progress) else {
            log::trace!("Render requested while rendering, ignored");
            return None;
        };

        let (restarted, camera_changed) = self.prepare_render_pass(kind);
        let cache_hits = self.update_all_representations();
        let (events, items, render_time) = self.perform_render();
        let presented = self.finalize_render_pass();

        let report = PassReport {
            pass: self.pass,
            restarted,
            camera_changed,
            wend_done: self.wend_done,
            display_done: self.display_done,
            presented,
            render_requested: events.render_requested,
            items,
            cache_hits,
            render_time,
        };
        log::trace!("{:?}", report);
        Some(report)
    }

    /// Returns (sweep restarted, camera changed)
    fn prepare_render_pass(&mut self, kind: RenderKind) -> (bool, bool) {
        let camera = self.surface.camera_state();
        let camera_changed = self.view.is_none_or(|v| v.camera != camera);
        if camera_changed {
            let frustum = Frustum::from_homogeneous(&self.surface.world_frustum(&camera));
            self.view = Some(ViewSnapshot::new(camera, frustum));
        }

        let command = self.pending.take();
        let restart = camera_changed || self.wend_done || self.display_done || command.is_some();

        for slot in &mut self.slots {
            slot.drawn = false;
        }

        if restart {
            self.pass = 0;
            self.surface.clear();

            // Automatic steps only follow a completed sweep
            let auto = !camera_changed && command.is_none() && kind == RenderKind::Still && self.wend_done;
            let step = match command {
                Some(Command::Refine) => Some(Command::Refine),
                Some(Command::Coarsen) => Some(Command::Coarsen),
                Some(Command::Restart) => None,
                None if auto => match self.refinement_mode {
                    RefinementMode::AutoRefine => Some(Command::Refine),
                    RefinementMode::AutoCoarsen => Some(Command::Coarsen),
                    RefinementMode::Manual => None,
                },
                None => None,
            };

            for slot in self.slots.iter_mut().filter(|s| s.visible) {
                if let Some(view) = &self.view {
                    if camera_changed || command.is_some() {
                        slot.rep.set_view(view);
                    }
                }
                match step {
                    Some(Command::Refine) => slot.rep.refine(),
                    Some(Command::Coarsen) => slot.rep.coarsen(),
                    _ => {}
                }
                slot.rep.prepare_first_pass();
                slot.drawn = true;
            }
            log::debug!(
                "Sweep started (camera changed: {}, step: {:?})",
                camera_changed,
                step
            );
        } else {
            self.pass += 1;
            for slot in self.slots.iter_mut().filter(|s| s.visible) {
                let state = slot.rep.state();
                if !state.all_done && !state.wend_done {
                    slot.rep.prepare_another_pass();
                }
            }
        }

        self.wend_done = true;
        self.display_done = true;
        (restart, camera_changed)
    }

    /// Returns the number of pieces served from a cache
    fn update_all_representations(&mut self) -> usize {
        let mut hits = 0;
        for slot in self.slots.iter_mut().filter(|s| s.visible) {
            let state = slot.rep.state();
            let eligible = if slot.rep.is_streaming() {
                !state.all_done && !state.wend_done
            } else {
                self.pass == 0
            };
            if eligible {
                slot.rep.choose_next_piece();
                slot.drawn = true;
            }

            let state = slot.rep.state();
            if eligible && state.was_cache_hit {
                hits += 1;
            }
            self.wend_done &= state.wend_done;
        }
        hits
    }

    fn perform_render(&mut self) -> (SurfaceEvents, usize, Duration) {
        let items: Vec<RenderItem<'_>> = self
            .slots
            .iter()
            .filter(|s| s.visible && s.drawn)
            .filter_map(|s| {
                s.rep.output().map(|output| RenderItem {
                    representation: s.rep.name(),
                    output,
                })
            })
            .collect();

        self.timer.begin();
        let events = self.surface.render_back_buffer(&items);
        let elapsed = self.timer.end().unwrap_or_default();
        (events, items.len(), elapsed)
    }

    /// Returns whether the back buffer was presented
    fn finalize_render_pass(&mut self) -> bool {
        if self.refinement_mode == RefinementMode::Manual {
            self.display_done = self.wend_done;
        } else {
            for slot in self.slots.iter_mut().filter(|s| s.visible) {
                slot.rep.finish_pass();
                self.display_done &= slot.rep.state().all_done;
            }
        }

        let present = match self.options.show_on {
            ShowOn::EveryPiece => true,
            ShowOn::OnRefine => self.wend_done,
            ShowOn::OnFinish => false,
        } || self.display_done;

        if present {
            self.surface.copy_back_to_front();
        }
        if self.display_done {
            log::debug!("Display done after pass {}", self.pass);
        }
        present
    }
}
