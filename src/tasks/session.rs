use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::{CacheStats, SliceCache};
use crate::config::{Configuration, GridConfig, RenderSettings};
use crate::events::{JobId, RenderCommand, SessionEvent};
use crate::processing::slice::ImageSource;
use crate::render::tile::Face;
use crate::tasks::handoff::Handoff;
use crate::tasks::preparer;
use crate::tasks::render_loop::{FrameSink, RenderHandle, RenderLoop, SharedFace};

struct State {
    front: Option<ImageSource>,
    back: Option<ImageSource>,
    initial: Face,
    cancel: CancellationToken,
    render: Option<RenderHandle>,
    commands: Option<Sender<RenderCommand>>,
}

/// Host-facing controller of one flip grid.
///
/// Image changes commission preparation jobs on the tokio runtime; flips are
/// forwarded to the render thread. Progress is reported on the event
/// receiver returned by [`Session::new`].
pub struct Session {
    grid: GridConfig,
    render_settings: RenderSettings,
    cache: Arc<SliceCache>,
    handoff: Arc<Handoff>,
    events: Sender<SessionEvent>,
    face: Arc<SharedFace>,
    runtime: Handle,
    state: Mutex<State>,
}

impl Session {
    pub fn new(config: Configuration, runtime: Handle) -> Result<(Self, Receiver<SessionEvent>)> {
        let config = config.validated()?;
        let cache = Arc::new(SliceCache::new(config.cache_budget_bytes));
        Ok(Self::with_cache(config, runtime, cache))
    }

    /// Like [`new`](Self::new) but slicing through a caller-owned cache,
    /// e.g. one shared by several grids.
    pub fn with_cache(
        config: Configuration,
        runtime: Handle,
        cache: Arc<SliceCache>,
    ) -> (Self, Receiver<SessionEvent>) {
        let (events, rx) = crossbeam_channel::unbounded();
        let grid = config.grid();
        let state = State {
            front: grid.front_image.clone(),
            back: grid.back_image.clone(),
            initial: grid.initial_face,
            cancel: CancellationToken::new(),
            render: None,
            commands: None,
        };
        let session = Self {
            face: Arc::new(SharedFace::new(grid.initial_face)),
            render_settings: config.render(),
            grid,
            cache,
            handoff: Arc::new(Handoff::new(events.clone())),
            events,
            runtime,
            state: Mutex::new(state),
        };
        (session, rx)
    }

    /// Bind the grid to a surface: start the render thread and prepare the
    /// first tile list.
    pub fn attach<S: FrameSink>(&self, sink: S) -> Result<JobId> {
        let mut state = self.state.lock();
        ensure!(state.render.is_none(), "session is already attached");

        self.face.store(state.initial);
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let render_loop = RenderLoop::new(
            sink,
            self.render_settings,
            command_rx,
            Arc::clone(&self.handoff),
            self.events.clone(),
            Arc::clone(&self.face),
        );
        let handle = render_loop
            .spawn()
            .context("failed to spawn render thread")?;
        state.render = Some(handle);
        state.commands = Some(commands);
        info!("session attached");
        Ok(self.commission(&mut state))
    }

    /// Flip every tile of the visible grid.
    pub fn flip_all(&self) {
        let state = self.state.lock();
        match &state.commands {
            Some(commands) => {
                let _ = commands.send(RenderCommand::FlipAll);
            }
            None => debug!("flip requested while detached"),
        }
    }

    /// Put `image` on the face that is currently turned away and prepare a
    /// new list starting from the visible face. Returns the face `image` was
    /// assigned to.
    pub fn set_next_image(&self, image: impl Into<ImageSource>) -> Face {
        let image = image.into();
        let mut state = self.state.lock();
        let visible = self.face.load();
        let target = visible.opposite();
        debug!(source = %image.describe(), face = ?target, "next image");
        match target {
            Face::Back => state.back = Some(image),
            Face::Front => state.front = Some(image),
        }
        state.initial = visible;
        if state.render.is_some() {
            self.commission(&mut state);
        }
        target
    }

    /// Drop both images; the grid falls back to its solid colors.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.front = None;
        state.back = None;
        state.initial = self.face.load();
        if state.render.is_some() {
            self.commission(&mut state);
        }
    }

    /// Stop drawing and wait for the render thread. No frame is drawn after
    /// this returns.
    pub fn detach(&self) {
        let mut state = self.state.lock();
        let Some(mut handle) = state.render.take() else {
            return;
        };
        handle.signal_stop();
        state.cancel.cancel();
        self.handoff.abandon();
        handle.join();
        state.commands = None;
        info!("session detached");
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().render.is_some()
    }

    /// Face the grid shows, or is turning to.
    pub fn displayed_face(&self) -> Face {
        self.face.load()
    }

    pub fn current_job(&self) -> JobId {
        self.handoff.current()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn commission(&self, state: &mut State) -> JobId {
        state.cancel.cancel();
        let cancel = CancellationToken::new();
        state.cancel = cancel.clone();

        let job = self.handoff.begin();
        let config = self
            .grid
            .with_faces(state.front.clone(), state.back.clone(), state.initial);
        info!(job = %job, initial = ?state.initial, "commissioning preparation");
        self.runtime.spawn(preparer::run_job(
            job,
            config,
            Arc::clone(&self.cache),
            Arc::clone(&self.handoff),
            cancel,
        ));
        job
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.detach();
    }
}
