//! SlideshowFX Engine - Archive-Backed Presentations
//!
//! Templates (`.sfxt`) and presentations (`.sfx`) are zip archives unpacked
//! into a working directory, edited there, and zipped back on save.
//!
//! # Ground Rules
//! 1. The slide list is the only source of slide order
//! 2. Slide numbers are opaque keys, never interpreted
//! 3. Stored element content keeps its `${variables}`; only the document is substituted
//! 4. One snapshot cascade at a time, and a failure ends it

pub mod archive;
pub mod engine;
pub mod hashing;
pub mod html;
pub mod presentation;
pub mod presentation_engine;
pub mod settings;
pub mod snapshot;
pub mod template;
pub mod variables;

pub use engine::{Engine, EngineCore, EngineError};
pub use hashing::{canonical_json, configuration_fingerprint};
pub use html::HtmlDocument;
pub use presentation::{PresentationConfiguration, Resource, ResourceType, Slide, SlideElement};
pub use presentation_engine::PresentationEngine;
pub use settings::Settings;
pub use snapshot::{
    CaptureError, CascadeState, CascadeStep, PresentationOutline, SlidePreview, SlideRenderer,
    SnapshotCascade,
};
pub use template::{
    DynamicAttribute, SlideElementTemplate, SlideTemplate, TemplateConfiguration, TemplateEngine,
};
pub use variables::{substitute, Variable, VariableSet};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
