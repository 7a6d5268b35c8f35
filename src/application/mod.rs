//! Application services: the render pipeline and the ports it is assembled from.

pub mod error;
pub mod ports;
pub mod render;
