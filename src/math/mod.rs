//! Math utilities

pub mod aabb;
pub mod basis;

pub use aabb::Aabb;
pub use basis::orthonormal_basis;
