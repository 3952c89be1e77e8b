//! Berth Engine - templating and manifest rendering
//!
//! Two layers live here:
//! - `Renderer`: a MiniJinja-based text templating facility with a fixed,
//!   deterministic helper set, shared by manifests, image tags, namespace
//!   patterns, `when` expressions and hook bodies
//! - the manifest rendering engine: turns a stack model plus a render
//!   context into a concrete, ordered multi-document resource stream

pub mod error;
pub mod functions;
pub mod loader;
pub mod manifest;
pub mod postprocess;
pub mod renderer;

pub use error::{EngineError, Result};
pub use loader::{load_stack, resolve_namespace};
pub use manifest::{encode_documents, render_stack, when_included, RenderFilters, RenderedDocument};
pub use renderer::Renderer;
