//! The compositing thread.
//!
//! Owns the tile list exclusively. Preparation jobs reach it only through the
//! [`Handoff`], the session only through [`RenderCommand`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use image::RgbaImage;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, trace};

use crate::config::RenderSettings;
use crate::error::Error;
use crate::events::{RenderCommand, SessionEvent};
use crate::render::canvas::{Canvas, PixelCanvas};
use crate::render::tile::{Face, Tile};
use crate::tasks::handoff::Handoff;

const IDLE_TICK: Duration = Duration::from_millis(50);

/// The host's drawable surface.
pub trait FrameSink: Send + 'static {
    type Canvas: Canvas;

    /// Hand out a canvas for one frame. [`Error::SurfaceUnavailable`] skips
    /// the frame.
    fn acquire(&mut self) -> Result<Self::Canvas, Error>;

    fn present(&mut self, canvas: Self::Canvas);
}

/// In-memory sink keeping the most recently presented frame.
#[derive(Clone)]
pub struct SnapshotSink {
    width: u32,
    height: u32,
    latest: Arc<Mutex<Option<RgbaImage>>>,
    presented: Arc<AtomicU64>,
}

impl SnapshotSink {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            latest: Arc::new(Mutex::new(None)),
            presented: Arc::default(),
        }
    }

    pub fn latest(&self) -> Option<RgbaImage> {
        self.latest.lock().clone()
    }

    pub fn frames_presented(&self) -> u64 {
        self.presented.load(Ordering::Acquire)
    }
}

impl FrameSink for SnapshotSink {
    type Canvas = PixelCanvas;

    fn acquire(&mut self) -> Result<PixelCanvas, Error> {
        Ok(PixelCanvas::new(self.width, self.height))
    }

    fn present(&mut self, canvas: PixelCanvas) {
        *self.latest.lock() = Some(canvas.into_image());
        self.presented.fetch_add(1, Ordering::AcqRel);
    }
}

/// Face the grid is settled on or heading to, readable from any thread.
#[derive(Debug, Default)]
pub struct SharedFace(AtomicU8);

impl SharedFace {
    pub fn new(face: Face) -> Self {
        let shared = Self::default();
        shared.store(face);
        shared
    }

    pub fn load(&self) -> Face {
        match self.0.load(Ordering::Acquire) {
            0 => Face::Front,
            _ => Face::Back,
        }
    }

    pub fn store(&self, face: Face) {
        let v = match face {
            Face::Front => 0,
            Face::Back => 1,
        };
        self.0.store(v, Ordering::Release);
    }
}

pub struct RenderLoop<S: FrameSink> {
    sink: S,
    settings: RenderSettings,
    commands: Receiver<RenderCommand>,
    handoff: Arc<Handoff>,
    events: Sender<SessionEvent>,
    running: Arc<AtomicBool>,
    face: Arc<SharedFace>,
    tiles: Vec<Tile>,
    rng: StdRng,
    was_animating: bool,
}

impl<S: FrameSink> RenderLoop<S> {
    pub fn new(
        sink: S,
        settings: RenderSettings,
        commands: Receiver<RenderCommand>,
        handoff: Arc<Handoff>,
        events: Sender<SessionEvent>,
        face: Arc<SharedFace>,
    ) -> Self {
        let rng = match settings.stagger_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            sink,
            settings,
            commands,
            handoff,
            events,
            running: Arc::new(AtomicBool::new(true)),
            face,
            tiles: Vec::new(),
            rng,
            was_animating: false,
        }
    }

    pub fn spawn(self) -> std::io::Result<RenderHandle> {
        let running = Arc::clone(&self.running);
        let thread = thread::Builder::new()
            .name("flip-grid-render".into())
            .spawn(move || self.run())?;
        Ok(RenderHandle {
            running,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        info!("render loop started");
        while self.running.load(Ordering::Acquire) {
            let frame_start = Instant::now();
            while let Ok(cmd) = self.commands.try_recv() {
                self.apply(cmd);
            }
            self.adopt();

            if self.tiles.is_empty() {
                match self.commands.recv_timeout(IDLE_TICK) {
                    Ok(cmd) => self.apply(cmd),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                continue;
            }

            self.render_frame();

            let elapsed = frame_start.elapsed();
            if elapsed < self.settings.frame_interval {
                thread::sleep(self.settings.frame_interval - elapsed);
            }
        }
        info!("render loop stopped");
    }

    fn apply(&mut self, cmd: RenderCommand) {
        match cmd {
            RenderCommand::FlipAll => {
                let now = Instant::now();
                let mut started = 0usize;
                for tile in &mut self.tiles {
                    if tile.trigger_flip(now, &mut self.rng) {
                        started += 1;
                    }
                }
                debug!(started, "flip all");
                self.publish_face();
            }
        }
    }

    fn adopt(&mut self) {
        let Some((job, mut tiles)) = self.handoff.take() else {
            return;
        };
        if !self.tiles.is_empty() {
            let now = Instant::now();
            for tile in &mut tiles {
                tile.trigger_flip(now, &mut self.rng);
            }
        }
        debug!(job = %job, "swapped tile list");
        self.tiles = tiles;
        self.publish_face();
    }

    fn publish_face(&self) {
        if let Some(first) = self.tiles.first() {
            self.face.store(first.state());
        }
    }

    fn render_frame(&mut self) {
        let mut canvas = match self.sink.acquire() {
            Ok(canvas) => canvas,
            Err(err) => {
                debug!(error = %err, "skipping frame");
                return;
            }
        };
        canvas.clear(self.settings.background);
        let now = Instant::now();
        for tile in &mut self.tiles {
            tile.draw(&mut canvas, now);
        }
        self.sink.present(canvas);
        trace!("frame presented");

        let animating = self.tiles.iter().any(Tile::is_in_progress);
        if self.was_animating && !animating {
            debug!("flip cycle completed");
            let _ = self.events.send(SessionEvent::FlipCycleCompleted);
        }
        self.was_animating = animating;
    }
}

/// Owner of the render thread.
pub struct RenderHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RenderHandle {
    /// Ask the loop to exit after the current iteration.
    pub fn signal_stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Wait for the thread to exit. No frame is drawn after this returns.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("render thread panicked");
            }
        }
    }

    pub fn stop(&mut self) {
        self.signal_stop();
        self.join();
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some() && self.running.load(Ordering::Acquire)
    }
}

impl Drop for RenderHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
