//! Document rendering.
//!
//! Rendering is a pure projection of the document text: sanitize inline
//! payloads, parse the result into blocks, then resolve what the blocks point
//! at. The only side effects are blob interning and poll registration, both
//! idempotent for unchanged text.

mod service;
mod types;

pub use service::html::render_html;
pub use service::inline::{format as format_inline, is_safe_url, normalize_url};
pub use service::outline::{build_outline, duplicate_headings};
pub use service::parser::{BlockParser, ParseDiagnostic, parse};
pub use service::BlockRenderService;
pub use types::{
    ContentMetrics, DuplicateHeading, EmbedTitle, OutlineEntry, RenderError, RenderOutput,
    RenderRequest, RenderService, SpannedBlock,
};
