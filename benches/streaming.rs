use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, black_box};

use glam::DVec3;

use lodstream::core::{CameraState, Projection};
use lodstream::math::{Aabb, Frustum};
use lodstream::streaming::{
    HeightFieldParams, HeightFieldSource, PieceCache, PieceContent, PieceData, PieceId,
    PieceStreamer, PolyMesh, RecordingSurface, ResolutionSampler, StreamOptions,
    StreamingView, visibility_score,
};

fn quad_piece(index: u32, count: u32, resolution: f64) -> PieceData {
    let z = index as f32;
    PieceData::new(
        PieceId::new(index, count),
        resolution,
        PieceContent::Poly(PolyMesh {
            points: vec![[0.0, 0.0, z], [1.0, 0.0, z], [1.0, 1.0, z], [0.0, 1.0, z]],
            triangles: vec![[0, 1, 2], [0, 2, 3]],
            scalars: vec![z; 4],
        }),
    )
}

fn overhead_camera() -> CameraState {
    CameraState::new(DVec3::new(128.0, 128.0, 400.0), DVec3::new(128.0, 128.0, 0.0), DVec3::Y)
}

fn bench_sampler_sweep(c: &mut Criterion) {
    let mut sampler = ResolutionSampler::new(2, 8, 2);
    sampler.set_whole_extent([0, 1024, 0, 1024, 0, 0], [1.0; 3]);

    c.bench_function("sampler_resolution_sweep", |b| {
        let mut step = 0u32;
        b.iter(|| {
            step = (step + 1) % 64;
            sampler.sample(black_box(step as f64 / 63.0))
        });
    });
}

fn bench_sampler_pieces(c: &mut Criterion) {
    let mut sampler = ResolutionSampler::new(2, 6, 4);
    sampler.set_whole_extent([0, 512, 0, 512, 0, 0], [1.0; 3]);

    c.bench_function("sampler_piece_extents_1024", |b| {
        b.iter(|| {
            for index in 0..1024 {
                black_box(sampler.sample_piece(black_box(0.5), index, 1024));
            }
        });
    });
}

fn bench_cache_hits(c: &mut Criterion) {
    let mut cache = PieceCache::new(-1);
    for index in 0..256 {
        cache.fetch_or_store(&PieceId::new(index, 256), 1.0, quad_piece(index, 256, 1.0), 0);
    }

    c.bench_function("cache_hit_256", |b| {
        b.iter(|| {
            for index in 0..256 {
                let id = PieceId::new(index, 256);
                let served = cache.fetch_or_store(&id, 0.5, PieceData::empty(id, 0.5), 0);
                black_box(served.is_hit());
            }
        });
    });
}

fn bench_cache_churn(c: &mut Criterion) {
    c.bench_function("cache_churn_limited_64", |b| {
        b.iter(|| {
            let mut cache = PieceCache::new(64);
            for index in 0..512 {
                let id = PieceId::new(index, 512);
                let served = cache.fetch_or_store(&id, 0.5, quad_piece(index, 512, 0.5), 0);
                black_box(served.is_hit());
            }
        });
    });
}

fn bench_aggregate_rebuild(c: &mut Criterion) {
    let mut cache = PieceCache::new(-1);
    for index in 0..256 {
        cache.fetch_or_store(&PieceId::new(index, 256), 1.0, quad_piece(index, 256, 1.0), 0);
    }

    c.bench_function("aggregate_rebuild_256", |b| {
        let mut fine = false;
        b.iter(|| {
            // Swap one piece's resolution so the aggregate is stale every time
            fine = !fine;
            let resolution = if fine { 1.0 } else { 0.5 };
            let id = PieceId::new(0, 256);
            cache.invalidate(&id);
            cache.fetch_or_store(&id, resolution, quad_piece(0, 256, resolution), 0);
            black_box(cache.build_aggregate().map(|m| m.triangles.len()));
        });
    });
}

fn bench_visibility_score(c: &mut Criterion) {
    let camera = overhead_camera();
    let projection = Projection::new(45.0, 1.0, 0.1, 1000.0);
    let frustum = Frustum::from_corners(projection.world_corners(&camera));
    let boxes: Vec<Aabb> = (0..1024)
        .map(|i| {
            let x = (i % 32) as f64 * 8.0;
            let y = (i / 32) as f64 * 8.0;
            Aabb::new(DVec3::new(x, y, 0.0), DVec3::new(x + 8.0, y + 8.0, 32.0))
        })
        .collect();

    c.bench_function("visibility_score_1024", |b| {
        b.iter(|| {
            let mut total = 0.0;
            for bounds in &boxes {
                total += visibility_score(black_box(bounds), camera.eye, &frustum, 1.0);
            }
            total
        });
    });
}

fn bench_view_until_done(c: &mut Criterion) {
    let options = Arc::new(StreamOptions {
        tree_height: 4,
        branching_degree: 4,
        ..Default::default()
    });

    c.bench_function("view_render_until_done_129", |b| {
        b.iter(|| {
            let source = HeightFieldSource::new(HeightFieldParams {
                samples: 129,
                ..Default::default()
            });
            let streamer = PieceStreamer::new("terrain", source, Arc::clone(&options));
            let camera = CameraState::new(
                DVec3::new(64.0, 64.0, 300.0),
                DVec3::new(64.0, 64.0, 0.0),
                DVec3::Y,
            );
            let surface = RecordingSurface::new(camera, Projection::new(45.0, 1.0, 0.1, 1000.0));
            let mut view = StreamingView::new(surface, Arc::clone(&options));
            view.add_representation(Box::new(streamer));
            black_box(view.render_until_done(10_000))
        });
    });
}

fn bench_view_orbit_cached(c: &mut Criterion) {
    let options = Arc::new(StreamOptions {
        tree_height: 3,
        branching_degree: 4,
        ..Default::default()
    });
    let source = HeightFieldSource::new(HeightFieldParams {
        samples: 129,
        ..Default::default()
    });
    let streamer = PieceStreamer::new("terrain", source, Arc::clone(&options));
    let surface = RecordingSurface::new(
        CameraState::new(DVec3::new(64.0, 64.0, 300.0), DVec3::new(64.0, 64.0, 0.0), DVec3::Y),
        Projection::new(45.0, 1.0, 0.1, 1000.0),
    );
    let mut view = StreamingView::new(surface, options);
    view.add_representation(Box::new(streamer));
    view.render_until_done(10_000);

    c.bench_function("view_orbit_step_cached", |b| {
        let mut step = 0u32;
        b.iter(|| {
            step += 1;
            let angle = step as f64 * 0.1;
            let eye = DVec3::new(64.0 + 200.0 * angle.cos(), 64.0 + 200.0 * angle.sin(), 200.0);
            view.surface_mut()
                .set_camera(CameraState::new(eye, DVec3::new(64.0, 64.0, 0.0), DVec3::Z));
            black_box(view.render_until_done(10_000))
        });
    });
}

criterion_group!(
    benches,
    bench_sampler_sweep,
    bench_sampler_pieces,
    bench_cache_hits,
    bench_cache_churn,
    bench_aggregate_rebuild,
    bench_visibility_score,
    bench_view_until_done,
    bench_view_orbit_cached,
);

criterion_main!(benches);
