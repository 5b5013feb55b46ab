//! Optional declarative risk overlay.

pub mod meta;
pub mod overlay;

pub use meta::RulesetMeta;
pub use overlay::{OverlayDns, Ruleset};
