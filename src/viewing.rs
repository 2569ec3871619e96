//! Viewing strategy selection.
//!
//! This is the only place that decides whether a viewer reads the original
//! upload in place (**direct**) or the generated Deep Zoom pyramid
//! (**pyramid**). The slide listing and the per-slide view endpoint both
//! expose its result, so clients never re-derive it.
//!
//! | directly streamable | converted | viewable | strategy | fallback |
//! |---|---|---|---|---|
//! | yes | no  | any | direct  | pyramid |
//! | any | yes | any | pyramid | none    |
//! | no  | no  | yes | pyramid | none    |
//! | no  | no  | no  | direct (best effort) | pyramid |

use serde::{Deserialize, Serialize};

use crate::format::is_directly_streamable;

/// Where a viewer gets its tiles from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Stream the original file's own multi-resolution structure
    Direct,

    /// Serve tiles from the generated pyramid via its descriptor
    Pyramid,
}

impl Strategy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Pyramid => "pyramid",
        }
    }
}

/// Chosen strategy and what to try if it fails at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewPlan {
    pub strategy: Strategy,
    pub fallback: Option<Strategy>,
}

/// Choose a strategy from a slide's extension and conversion flags.
///
/// Deterministic and side-effect free.
pub fn select_strategy(extension: &str, converted: bool, viewable: bool) -> ViewPlan {
    if is_directly_streamable(extension) && !converted {
        ViewPlan {
            strategy: Strategy::Direct,
            fallback: Some(Strategy::Pyramid),
        }
    } else if converted || viewable {
        ViewPlan {
            strategy: Strategy::Pyramid,
            fallback: None,
        }
    } else {
        // The container may still open even outside the known-safe set
        ViewPlan {
            strategy: Strategy::Direct,
            fallback: Some(Strategy::Pyramid),
        }
    }
}

/// Strategy to try after `failed` did not work, or `None` if viewing has
/// failed for good.
///
/// Falling back to the pyramid requires a published descriptor.
pub fn next_after_failure(
    plan: &ViewPlan,
    failed: Strategy,
    descriptor_available: bool,
) -> Option<Strategy> {
    if failed != plan.strategy {
        return None;
    }
    match plan.fallback {
        Some(Strategy::Pyramid) if descriptor_available => Some(Strategy::Pyramid),
        _ => None,
    }
}
