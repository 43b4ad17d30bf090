//! Loads the tiles of a zoom level into the tile cache and prints where every tile came from.
//!
//! ```sh
//! RUST_LOG=info cargo run --example fetch_tiles -- 2
//! ```
//!
//! Run it twice: the second time all tiles are read from `tiles_cache.db`.

use meridian::layer::{OnlineTileLayerBuilder, Tile};
use meridian::meridian_types::TileCoordinate;
use tokio::sync::mpsc;

// 4^5 tiles is the largest grid this example downloads.
const MAX_ZOOM: u32 = 5;

/// All tiles of the zoom level.
fn zoom_level_tiles(zoom: u32) -> Result<Vec<TileCoordinate>, String> {
    if zoom > MAX_ZOOM {
        return Err(format!("zoom level {zoom} is above the limit of {MAX_ZOOM}"));
    }

    let size = 1i32 << zoom;
    Ok((0..size)
        .flat_map(|x| (0..size).map(move |y| TileCoordinate::new(zoom, x, y)))
        .collect())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let zoom: u32 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 1,
    };
    let tiles = zoom_level_tiles(zoom)?;

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let layer = OnlineTileLayerBuilder::new_osm()
        .with_default_cache_db()
        .with_user_agent(concat!("meridian-example/", env!("CARGO_PKG_VERSION")))
        .with_consumer(move |coordinate: TileCoordinate, tile: Tile| {
            let _ = sender.send((coordinate, tile));
        })
        .build()
        .await?;

    let scheduled = layer.request_many(tiles);
    println!("Requested {scheduled} tiles");

    for _ in 0..scheduled {
        let next = tokio::time::timeout(std::time::Duration::from_secs(60), receiver.recv()).await;
        match next {
            Ok(Some((coordinate, tile))) => println!(
                "{coordinate}: {:?}, {}x{}",
                tile.source(),
                tile.image().width(),
                tile.image().height()
            ),
            _ => break,
        }
    }

    let unfinished = layer.cancel_all();
    if unfinished > 0 {
        println!("{unfinished} tiles were not loaded");
    }

    Ok(())
}
