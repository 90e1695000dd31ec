//! Static scene inputs: geometry, bounds, cameras and the light

pub mod bounds;
pub mod camera;
pub mod light;
pub mod mesh;

pub use bounds::SceneBoundsTracker;
pub use camera::{Camera, CameraMatrices};
pub use light::{DirectionalLight, LightProcessingState};
pub use mesh::{MeshVertex, StaticMesh};
