use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

use anyhow::{Context as _, bail};
use indicatif::ProgressBar;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use sceneray::{
    FaceFlags, SceneBuilder, SceneDump, SceneMesh, WideSceneRayTracer,
    geometry::{WorldBox, WorldPoint, WorldVector},
    scene::WideFaceIndex,
};
use tracing_subscriber::EnvFilter;

const RAYS_PER_WORKER: usize = 100_000;
const LEAF_SIZE: f32 = 4.0;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args_os().skip(1);
    let Some(input) = args.next().map(PathBuf::from) else {
        bail!("Usage: sceneray-cli <scene.obj | scene.srtd> [output.srtd]");
    };
    let output = args.next().map(PathBuf::from);

    let bytes = load_dump_bytes(&input)?;
    if let Some(output) = &output {
        fs::write(output, &bytes).with_context(|| format!("Writing {}", output.display()))?;
        tracing::info!(path = %output.display(), size = bytes.len(), "dump written");
    }

    let scene = SceneDump::<WideFaceIndex>::from_bytes(&bytes).context("Loading dump")?;
    println!("{}", scene.statistics());

    cast_random_rays(WideSceneRayTracer::new(scene));

    Ok(())
}

/// Reads a dump, or builds one from an OBJ file.
fn load_dump_bytes(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("obj")) {
        let mesh = SceneMesh::with_obj(path, FaceFlags::CULL_BOTH)
            .with_context(|| format!("Loading {}", path.display()))?;
        tracing::info!(vertices = mesh.vertices.len(), faces = mesh.faces.len(), "mesh loaded");

        let scene = SceneBuilder::builder()
            .leaf_size(WorldVector::repeat(LEAF_SIZE))
            .build()
            .build::<WideFaceIndex>(&mesh);
        Ok(scene.to_bytes())
    } else {
        fs::read(path).with_context(|| format!("Reading {}", path.display()))
    }
}

/// Shoots random rays through the scene box from all cores against one shared tracer.
fn cast_random_rays(tracer: WideSceneRayTracer) {
    let bounds = tracer.bounding_box().clone();
    if bounds.is_empty() {
        tracing::warn!("scene is empty, no rays cast");
        return;
    }

    let workers = num_cpus::get();
    let total = workers * RAYS_PER_WORKER;
    let hits = AtomicUsize::new(0);
    let bar = ProgressBar::new(total as u64);

    thread::scope(|scope| {
        for worker_id in 0..workers {
            let tracer = tracer.clone();
            let hits = &hits;
            let bar = bar.clone();
            let bounds = &bounds;

            let spawned = thread::Builder::new()
                .name(format!("worker{worker_id}"))
                .spawn_scoped(scope, move || {
                    let mut rng = SmallRng::seed_from_u64(worker_id as u64);
                    let mut worker_hits = 0;
                    for i in 0..RAYS_PER_WORKER {
                        let origin = random_point(&mut rng, bounds);
                        let target = random_point(&mut rng, bounds);
                        if tracer.ray_hit(&origin, &(target - origin), 1.0, None) {
                            worker_hits += 1;
                        }
                        if i % 1024 == 1023 {
                            bar.inc(1024);
                        }
                    }
                    hits.fetch_add(worker_hits, Ordering::Relaxed);
                });
            if let Err(error) = spawned {
                tracing::error!(worker_id, %error, "failed to spawn worker");
            }
        }
    });
    bar.finish();

    let hits = hits.load(Ordering::Relaxed);
    tracing::info!(total, hits, "random rays cast");
}

fn random_point(rng: &mut impl Rng, bounds: &WorldBox) -> WorldPoint {
    let size = bounds.size();
    WorldPoint::from(bounds.min.coords + size.map(|s| rng.random::<f32>() * s))
}
