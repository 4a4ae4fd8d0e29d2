//! Per-tile flip state machine.
//!
//! A tile counts `step_count` from 0 (front settled) to [`MAX_STEPS`] (back
//! settled). While a flip is in flight `state` already names the destination
//! face; the face actually painted switches once the counter reaches the
//! halfway mark.

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use rand::Rng;
use serde::Deserialize;

use crate::processing::layout::Rect;
use crate::render::canvas::Canvas;
use crate::render::transform;

pub const MAX_STEPS: i32 = 180;
pub const HALF_STEPS: i32 = MAX_STEPS / 2;
pub const DEFAULT_STEP_SIZE: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Face {
    Front,
    Back,
}

impl Face {
    pub fn opposite(self) -> Self {
        match self {
            Face::Front => Face::Back,
            Face::Back => Face::Front,
        }
    }

    fn settled_steps(self) -> i32 {
        match self {
            Face::Front => 0,
            Face::Back => MAX_STEPS,
        }
    }
}

/// What one side of a tile shows.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceContent {
    Image(Arc<RgbaImage>),
    Color(Rgba<u8>),
}

impl FaceContent {
    fn paint(&self, canvas: &mut dyn Canvas, rect: Rect) {
        match self {
            FaceContent::Image(image) => canvas.draw_image(image, rect),
            FaceContent::Color(color) => canvas.fill_rect(rect, *color),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tile {
    rect: Rect,
    front: FaceContent,
    back: FaceContent,
    state: Face,
    in_progress: bool,
    step_count: i32,
    step_size: i32,
    angle_y: f32,
    angle_z: f32,
    animate: bool,
    start_at: Instant,
    max_delay: Duration,
}

impl Tile {
    /// A tile settled on the front face.
    pub fn new(rect: Rect, front: FaceContent, back: FaceContent) -> Self {
        Self {
            rect,
            front,
            back,
            state: Face::Front,
            in_progress: false,
            step_count: 0,
            step_size: DEFAULT_STEP_SIZE as i32,
            angle_y: 0.0,
            angle_z: 0.0,
            animate: true,
            start_at: Instant::now(),
            max_delay: Duration::ZERO,
        }
    }

    pub fn with_step_size(mut self, step_size: u32) -> Self {
        self.step_size = step_size.clamp(1, MAX_STEPS as u32) as i32;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_animation(mut self, enabled: bool) -> Self {
        self.animate = enabled;
        self
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Stable face, or the destination while a flip is in flight.
    pub fn state(&self) -> Face {
        self.state
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn step_count(&self) -> i32 {
        self.step_count
    }

    /// `(angle_y, angle_z)` in degrees.
    pub fn angles(&self) -> (f32, f32) {
        (self.angle_y, self.angle_z)
    }

    pub fn content(&self, face: Face) -> &FaceContent {
        match face {
            Face::Front => &self.front,
            Face::Back => &self.back,
        }
    }

    /// Face painted right now.
    pub fn displayed_face(&self) -> Face {
        if !self.in_progress {
            return self.state;
        }
        match self.state {
            Face::Back if self.step_count >= HALF_STEPS => Face::Back,
            Face::Front if self.step_count <= HALF_STEPS => Face::Front,
            destination => destination.opposite(),
        }
    }

    /// Snap to a settled face, abandoning any flip in flight.
    pub fn set_state(&mut self, face: Face) {
        self.state = face;
        self.in_progress = false;
        self.step_count = face.settled_steps();
        self.angle_y = 0.0;
        self.angle_z = 0.0;
    }

    /// Start turning toward the opposite face. Returns false when a flip is
    /// already running.
    pub fn flip(&mut self) -> bool {
        if self.in_progress {
            return false;
        }
        self.state = self.state.opposite();
        self.in_progress = true;
        true
    }

    /// [`flip`](Self::flip) with a random start inside the stagger window.
    pub fn trigger_flip<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) -> bool {
        if !self.flip() {
            return false;
        }
        let window = self.max_delay.as_millis() as u64;
        let delay = if window == 0 {
            0
        } else {
            rng.random_range(0..=window)
        };
        self.start_at = now + Duration::from_millis(delay);
        true
    }

    /// Whether the tile would paint rotated frames at `now`.
    pub fn is_turning(&self, now: Instant) -> bool {
        self.in_progress && now >= self.start_at
    }

    /// One animation tick.
    pub fn advance(&mut self) {
        if !self.in_progress {
            return;
        }
        let target = self.state.settled_steps();
        self.step_count = if target > self.step_count {
            (self.step_count + self.step_size).min(MAX_STEPS)
        } else {
            (self.step_count - self.step_size).max(0)
        };

        if self.step_count == target {
            self.in_progress = false;
            self.angle_y = 0.0;
            self.angle_z = 0.0;
            return;
        }
        if !self.animate {
            return;
        }
        let angle = match self.displayed_face() {
            Face::Front => self.step_count,
            Face::Back => self.step_count - MAX_STEPS,
        } as f32;
        self.angle_y = angle;
        self.angle_z = angle;
    }

    /// Paint this frame and step the animation.
    pub fn draw(&mut self, canvas: &mut dyn Canvas, now: Instant) {
        let face = self.displayed_face();
        if !self.is_turning(now) {
            self.content(face).paint(canvas, self.rect);
            return;
        }
        if self.animate {
            canvas.save();
            canvas.concat(&transform::card_flip(
                self.rect.center(),
                self.angle_y,
                self.angle_z,
            ));
            self.content(face).paint(canvas, self.rect);
            canvas.restore();
        } else {
            self.content(face).paint(canvas, self.rect);
        }
        self.advance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::color::opaque;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);

    fn tile() -> Tile {
        Tile::new(
            Rect::new(0, 0, 40, 40),
            FaceContent::Color(RED),
            FaceContent::Color(GREEN),
        )
    }

    fn ticks_to_settle(tile: &mut Tile) -> usize {
        let mut ticks = 0;
        while tile.is_in_progress() {
            tile.advance();
            ticks += 1;
            assert!(ticks <= MAX_STEPS as usize, "tile never settled");
        }
        ticks
    }

    #[derive(Default)]
    struct RecordingCanvas {
        depth: i32,
        max_depth: i32,
        concats: usize,
        fills: Vec<Rgba<u8>>,
    }

    impl Canvas for RecordingCanvas {
        fn save(&mut self) {
            self.depth += 1;
            self.max_depth = self.max_depth.max(self.depth);
        }
        fn restore(&mut self) {
            self.depth -= 1;
        }
        fn concat(&mut self, _transform: &transform::Projective) {
            self.concats += 1;
        }
        fn clear(&mut self, _color: Rgba<u8>) {}
        fn fill_rect(&mut self, _rect: Rect, color: Rgba<u8>) {
            self.fills.push(color);
        }
        fn draw_image(&mut self, _image: &RgbaImage, _rect: Rect) {}
    }

    #[test]
    fn default_flip_takes_thirty_ticks() {
        let mut tile = tile();
        assert!(tile.flip());
        assert_eq!(tile.state(), Face::Back);
        assert_eq!(ticks_to_settle(&mut tile), 30);
        assert_eq!(tile.step_count(), MAX_STEPS);
        assert_eq!(tile.angles(), (0.0, 0.0));
        assert_eq!(tile.displayed_face(), Face::Back);
    }

    #[test]
    fn flipping_twice_returns_to_front() {
        let mut tile = tile();
        tile.flip();
        ticks_to_settle(&mut tile);
        tile.flip();
        ticks_to_settle(&mut tile);
        assert_eq!(tile.state(), Face::Front);
        assert_eq!(tile.step_count(), 0);
        assert_eq!(tile.content(tile.displayed_face()), &FaceContent::Color(RED));
    }

    #[test]
    fn flip_mid_flight_is_ignored() {
        let mut tile = tile();
        assert!(tile.flip());
        tile.advance();
        assert!(!tile.flip());
        assert_eq!(tile.state(), Face::Back);
    }

    #[test]
    fn face_swaps_at_halfway_and_angle_keeps_turning() {
        let mut tile = tile();
        tile.flip();
        let mut seen = Vec::new();
        while tile.is_in_progress() {
            tile.advance();
            if tile.is_in_progress() {
                seen.push((tile.step_count(), tile.displayed_face(), tile.angles().0));
            }
        }
        for (step, face, angle) in seen {
            if step < HALF_STEPS {
                assert_eq!(face, Face::Front);
                assert_eq!(angle, step as f32);
            } else {
                assert_eq!(face, Face::Back);
                assert_eq!(angle, (step - MAX_STEPS) as f32);
            }
        }
    }

    #[test]
    fn uneven_step_size_still_swaps_and_settles() {
        let mut tile = tile().with_step_size(7);
        tile.flip();
        let mut swapped = false;
        while tile.is_in_progress() {
            tile.advance();
            if tile.displayed_face() == Face::Back {
                swapped = true;
            }
        }
        assert!(swapped);
        assert_eq!(tile.step_count(), MAX_STEPS);

        tile.flip();
        ticks_to_settle(&mut tile);
        assert_eq!(tile.step_count(), 0);
        assert_eq!(tile.displayed_face(), Face::Front);
    }

    #[test]
    fn disabled_animation_matches_tick_count_without_angles() {
        let mut animated = tile();
        let mut instant = tile().with_animation(false);
        animated.flip();
        instant.flip();
        let mut ticks = 0;
        while instant.is_in_progress() {
            instant.advance();
            assert_eq!(instant.angles(), (0.0, 0.0));
            ticks += 1;
        }
        assert_eq!(ticks, ticks_to_settle(&mut animated));
        assert_eq!(instant.state(), Face::Back);
    }

    #[test]
    fn set_state_snaps_to_settled_values() {
        let mut tile = tile();
        tile.flip();
        tile.advance();
        tile.set_state(Face::Back);
        assert!(!tile.is_in_progress());
        assert_eq!(tile.step_count(), MAX_STEPS);
        assert_eq!(tile.angles(), (0.0, 0.0));
    }

    #[test]
    fn start_delay_holds_the_current_face() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tile = tile().with_max_delay(Duration::from_secs(3600));
        let now = Instant::now();
        tile.trigger_flip(now, &mut rng);
        tile.start_at = now + Duration::from_secs(10);

        let mut canvas = RecordingCanvas::default();
        tile.draw(&mut canvas, now);
        assert_eq!(tile.step_count(), 0);
        assert_eq!(canvas.concats, 0);
        assert_eq!(canvas.fills, vec![RED]);

        tile.draw(&mut canvas, now + Duration::from_secs(11));
        assert_eq!(tile.step_count(), 6);
        assert_eq!(canvas.concats, 1);
    }

    #[test]
    fn trigger_flip_delay_stays_within_window() {
        let mut rng = StdRng::seed_from_u64(42);
        let now = Instant::now();
        for _ in 0..50 {
            let mut tile = tile().with_max_delay(Duration::from_millis(1100));
            assert!(tile.trigger_flip(now, &mut rng));
            assert!(tile.start_at >= now);
            assert!(tile.start_at <= now + Duration::from_millis(1100));
        }
    }

    #[test]
    fn draw_balances_save_and_restore() {
        let mut tile = tile();
        tile.flip();
        let mut canvas = RecordingCanvas::default();
        let now = Instant::now();
        while tile.is_in_progress() {
            tile.draw(&mut canvas, now);
        }
        assert_eq!(canvas.depth, 0);
        assert_eq!(canvas.max_depth, 1);
        assert_eq!(canvas.concats, 30);
        assert_eq!(canvas.fills.first(), Some(&RED));
        assert_eq!(canvas.fills.last(), Some(&GREEN));
    }

    #[test]
    fn disabled_animation_draws_flat_and_swaps_at_halfway() {
        let mut tile = tile().with_animation(false);
        tile.flip();
        let mut canvas = RecordingCanvas::default();
        let now = Instant::now();
        while tile.is_in_progress() {
            tile.draw(&mut canvas, now);
        }
        assert_eq!(canvas.concats, 0);
        assert_eq!(canvas.max_depth, 0);
        assert_eq!(canvas.fills.len(), 30);
        // step 6 per draw reaches 90 on the sixteenth draw
        assert!(canvas.fills[..15].iter().all(|c| *c == RED));
        assert!(canvas.fills[15..].iter().all(|c| *c == GREEN));
    }

    #[test]
    fn image_faces_draw_through_the_canvas() {
        use crate::render::canvas::PixelCanvas;
        let slice = Arc::new(RgbaImage::from_pixel(4, 4, opaque([9, 9, 9])));
        let mut tile = Tile::new(
            Rect::new(2, 2, 4, 4),
            FaceContent::Image(slice),
            FaceContent::Color(GREEN),
        );
        let mut canvas = PixelCanvas::new(8, 8);
        tile.draw(&mut canvas, Instant::now());
        assert_eq!(*canvas.pixels().get_pixel(3, 3), opaque([9, 9, 9]));
        assert_eq!(canvas.pixels().get_pixel(0, 0)[3], 0);
    }
}
