use std::sync::Arc;

use image::Rgba;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{SliceCache, SliceKey};
use crate::config::GridConfig;
use crate::error::Error;
use crate::events::JobId;
use crate::processing::layout::GridGeometry;
use crate::processing::slice::{self, ImageSource, Slices};
use crate::render::tile::{FaceContent, Tile};
use crate::tasks::handoff::Handoff;

enum Resolved {
    Slices(Slices),
    Color(Rgba<u8>),
}

impl Resolved {
    fn content(&self, index: usize, fallback: Rgba<u8>) -> FaceContent {
        match self {
            Resolved::Slices(slices) => slices
                .get(index)
                .map(|s| FaceContent::Image(Arc::clone(s)))
                .unwrap_or(FaceContent::Color(fallback)),
            Resolved::Color(color) => FaceContent::Color(*color),
        }
    }
}

fn check(cancel: &CancellationToken) -> Result<(), Error> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

fn resolve_face(
    source: Option<&ImageSource>,
    fallback: Rgba<u8>,
    geometry: &GridGeometry,
    cache: &SliceCache,
) -> Resolved {
    let Some(source) = source else {
        return Resolved::Color(fallback);
    };
    let key = SliceKey::new(source.identity(), geometry);
    if let Some(slices) = cache.get(&key) {
        return Resolved::Slices(slices);
    }
    match slice::slice_source(source, geometry) {
        Ok(slices) => {
            cache.insert(key, Arc::clone(&slices));
            Resolved::Slices(slices)
        }
        Err(err) => {
            warn!(source = %source.describe(), error = %err, "using fallback color");
            Resolved::Color(fallback)
        }
    }
}

/// Build the tile list for `config`. Runs synchronously; call it from a
/// blocking context.
pub fn prepare(
    config: &GridConfig,
    cache: &SliceCache,
    cancel: &CancellationToken,
) -> Result<Vec<Tile>, Error> {
    let geometry = config.geometry()?;
    debug!(
        width = geometry.width(),
        squares = geometry.squares_per_row(),
        dimension = geometry.square_dimension(),
        "grid geometry"
    );
    check(cancel)?;

    let front = resolve_face(
        config.front_image.as_ref(),
        config.front_fallback,
        &geometry,
        cache,
    );
    check(cancel)?;
    let back = resolve_face(
        config.back_image.as_ref(),
        config.back_fallback,
        &geometry,
        cache,
    );
    check(cancel)?;

    let n = geometry.squares_per_row() as usize;
    let mut tiles = Vec::with_capacity(geometry.tile_count());
    for row in 0..n {
        check(cancel)?;
        for col in 0..n {
            let index = row * n + col;
            let mut tile = Tile::new(
                geometry.tile_rect(index),
                front.content(index, config.front_fallback),
                back.content(index, config.back_fallback),
            )
            .with_step_size(config.step_size)
            .with_max_delay(config.max_start_delay)
            .with_animation(config.animation_enabled);
            tile.set_state(config.initial_face);
            tiles.push(tile);
        }
    }
    debug!(tiles = tiles.len(), "tiles prepared");
    Ok(tiles)
}

/// Run one preparation job on the blocking pool and hand its result to
/// `handoff`. Cancellation discards the result silently.
pub async fn run_job(
    job: JobId,
    config: GridConfig,
    cache: Arc<SliceCache>,
    handoff: Arc<Handoff>,
    cancel: CancellationToken,
) {
    let worker_cancel = cancel.clone();
    let work = tokio::task::spawn_blocking(move || prepare(&config, &cache, &worker_cancel));

    let result = select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        joined = work => match joined {
            Ok(result) => result,
            Err(err) => Err(Error::Worker(err.to_string())),
        },
    };

    match result {
        Ok(tiles) => {
            if !handoff.publish(job, tiles) {
                debug!(job = %job, "result arrived after job was superseded");
            }
        }
        Err(Error::Cancelled) => debug!(job = %job, "preparation cancelled"),
        Err(err) => handoff.fail(job, &err),
    }
}
