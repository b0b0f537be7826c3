//! Headless streaming viewer: orbits a camera around a synthetic terrain and
//! streams it to a recording surface.
//!
//! Usage: cargo run --release --bin stream_viewer -- [OPTIONS]
//!
//! Options:
//!   --config <PATH>   Stream options JSON (default: built-in defaults)
//!   --stops <N>       Camera positions around the orbit (default: 8)
//!   --size <N>        Terrain samples per side (default: 257)
//!   --seed <SEED>     Terrain seed (default: 12345)
//!   --passes <N>      Pass limit per camera stop (default: 2000)

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use glam::DVec3;

use lodstream::core::{CameraState, Projection};
use lodstream::streaming::{
    HeightFieldParams, HeightFieldSource, PieceStreamer, RecordingSurface, StreamOptions,
    StreamingView,
};

fn main() {
    lodstream::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let config = parse_arg::<PathBuf>(&args, "--config");
    let stops = parse_arg::<u32>(&args, "--stops").unwrap_or(8).max(1);
    let size = parse_arg::<u32>(&args, "--size").unwrap_or(257).max(2);
    let seed = parse_arg::<u32>(&args, "--seed").unwrap_or(12345);
    let max_passes = parse_arg::<usize>(&args, "--passes").unwrap_or(2000);

    let options = match &config {
        Some(path) => match StreamOptions::load(path) {
            Ok(options) => options,
            Err(e) => {
                log::error!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => StreamOptions::default(),
    };

    println!("=== Lodstream Viewer ===");
    println!("Terrain: {}x{} samples, seed {}", size, size, seed);
    println!(
        "Tree:    height {}, degree {}, rate {}",
        options.tree_height, options.branching_degree, options.sampling_rate
    );
    println!("Cache:   {}", options.cache_size_limit);
    println!();

    let params = HeightFieldParams {
        seed,
        samples: size,
        ..Default::default()
    };
    let half = (size - 1) as f64 * params.spacing / 2.0;
    let center = DVec3::new(half, half, 0.0);
    let radius = half * 2.5;
    let height = params.height_scale * 4.0;

    let options = Arc::new(options);
    let source = HeightFieldSource::new(params);
    let streamer = PieceStreamer::new("terrain", source, Arc::clone(&options));

    let projection = Projection::new(45.0, 16.0 / 9.0, 0.1, radius * 4.0);
    let surface = RecordingSurface::new(orbit_camera(center, radius, height, 0.0), projection);
    let mut view = StreamingView::new(surface, options);
    view.add_representation(Box::new(streamer));

    let start = Instant::now();
    for stop in 0..stops {
        let angle = stop as f64 / stops as f64 * std::f64::consts::TAU;
        view.surface_mut()
            .set_camera(orbit_camera(center, radius, height, angle));

        let stop_start = Instant::now();
        let passes = view.render_until_done(max_passes);
        let elapsed = stop_start.elapsed();

        let state = view.representation(0).map(|r| r.state()).unwrap_or_default();
        let cache = view.representation(0).and_then(|r| r.cache_stats()).unwrap_or_default();
        log::info!(
            "Stop {}/{}: {} passes in {:.1}ms, resolution {:.2}, done: {}, front buffer {} draws",
            stop + 1,
            stops,
            passes,
            elapsed.as_secs_f64() * 1000.0,
            state.current_resolution,
            view.is_display_done(),
            view.surface().front_buffer().len()
        );
        log::info!(
            "  cache: {} hits, {} misses ({:.0}% hit rate), {} stored, {} passed through",
            cache.hits,
            cache.misses,
            cache.hit_rate() * 100.0,
            cache.stored,
            cache.pass_through
        );
    }

    let stats = view.surface().stats();
    let timings = view.timings();
    println!();
    println!("=== Summary ===");
    println!("Total time:   {:.2}s", start.elapsed().as_secs_f64());
    println!("Passes:       {}", timings.pass_count);
    println!(
        "Render calls: avg {:.3}ms, min {:.3}ms, max {:.3}ms",
        timings.avg_ms, timings.min_ms, timings.max_ms
    );
    println!("Presents:     {}", stats.presents);
    println!("Clears:       {}", stats.clears);
    println!("Uploaded:     {:.1} MB", stats.bytes_uploaded as f64 / (1024.0 * 1024.0));
}

/// Camera on a circle around `center`, looking at it from above
fn orbit_camera(center: DVec3, radius: f64, height: f64, angle: f64) -> CameraState {
    let eye = center + DVec3::new(radius * angle.cos(), radius * angle.sin(), height);
    CameraState::new(eye, center, DVec3::Z)
}

fn parse_arg<T: FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}
