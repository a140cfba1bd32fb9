//! Vector analysis algorithms
//!
//! - Buffer: expand or shrink geometries by a planar distance

mod buffer;

pub use buffer::{
    buffer_geometry, buffer_layer, buffer_points, Buffer, BufferParams, DEFAULT_BUFFER_DISTANCE,
    DEFAULT_CIRCLE_SEGMENTS,
};
