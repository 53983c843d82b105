//! Type-safe cache key builders

use std::fmt;

/// Bumped whenever a cached value's shape changes.
pub const VERSION: &str = "v1";

pub mod catalog {
    use super::*;

    pub const NAMESPACE: &str = "catalog";

    /// The public pricing list, active products only.
    #[derive(Debug, Clone, Default)]
    pub struct PricingKey;

    impl fmt::Display for PricingKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:pricing", VERSION, NAMESPACE)
        }
    }
}
