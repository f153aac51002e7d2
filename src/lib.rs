pub mod geometry;
pub mod scene;
mod util;

pub use scene::{
    DumpError, FaceFlags, FaceIdx, SceneBuilder, SceneDump, SceneMesh, StaticSceneRayTracer,
    WideSceneRayTracer,
};
pub use util::Stats;
