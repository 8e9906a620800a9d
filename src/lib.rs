pub mod backend;
pub mod config;
pub mod renderer;

pub use renderer::{Frame, FrameOutcome, Renderer, RendererParams};
