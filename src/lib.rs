pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod processing {
    pub mod color;
    pub mod layout;
    pub mod slice;
}
pub mod render {
    pub mod canvas;
    pub mod tile;
    pub mod transform;
}
pub mod tasks {
    pub mod handoff;
    pub mod preparer;
    pub mod render_loop;
    pub mod session;
}

pub use config::Configuration;
pub use error::Error;
pub use events::{JobId, JobOutcome, SessionEvent};
pub use processing::slice::ImageSource;
pub use render::tile::Face;
pub use tasks::render_loop::{FrameSink, SnapshotSink};
pub use tasks::session::Session;
