pub mod building;
pub mod bvh;
pub mod dump;
pub mod faces;
pub mod geometry_store;
pub mod grid;
mod printing;
pub mod tracer;
pub mod woo;

#[cfg(test)]
pub(crate) mod test_scenes;

pub use building::{ObjOpenError, SceneBuilder, SceneMesh};
pub use dump::{DumpError, SceneDump};
pub use faces::{FaceFlags, FaceIdx, FaceIndex, VertexIdx, WideFaceIndex};
pub use printing::SceneStatistics;
pub use tracer::{
    CapsuleClip, GetFacesContext, HeightHit, NarrowSceneRayTracer, RayHit, StaticSceneRayTracer,
    WideSceneRayTracer,
};
