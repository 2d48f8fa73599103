//! Text utilities and static plugins for reagent.
//!
//! - [`json_extract`]: recover the tool-call JSON from noisy model output
//! - [`template`]: `{name}` interpolation used by prompts and chain steps
//! - [`plugins`]: the static plugin table

pub mod json_extract;
pub mod plugins;
pub mod template;

pub use json_extract::{extract_json, extract_json_value, is_truthy, parse_json_content};
pub use plugins::{default_registry, registry_for};
pub use template::render;
