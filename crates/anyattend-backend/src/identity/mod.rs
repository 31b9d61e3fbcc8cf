//! Identity normalisation and registry.

pub mod normalize;
pub mod registry;

pub use normalize::{NormalizedId, format_display, normalize};
pub use registry::IdentityRegistry;
