//! The shipped strategy variants.
//!
//! All four share the placement loop in `common`; each variant contributes
//! its per-file primitive and its capability/cost answers.

mod common;
mod copy;
mod hardlink;
mod hybrid;
mod symlink;

pub use copy::CopyStrategy;
pub use hardlink::HardlinkStrategy;
pub use hybrid::HybridStrategy;
pub use symlink::SymlinkStrategy;

use std::sync::Arc;

use crate::strategy::WorkspaceStrategy;

/// The default strategy order: hybrid first (links CAS content, copies the
/// rest), then the specialized variants, with full copy as the always-works
/// fallback.
pub fn default_strategies() -> Vec<Arc<dyn WorkspaceStrategy>> {
    vec![
        Arc::new(HybridStrategy),
        Arc::new(HardlinkStrategy),
        Arc::new(SymlinkStrategy),
        Arc::new(CopyStrategy),
    ]
}
