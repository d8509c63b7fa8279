pub mod animation;
pub mod collision;
pub mod emit;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod pipeline;
pub mod project;
pub mod skeleton;
pub mod source;
pub mod symbols;
pub mod transform;
