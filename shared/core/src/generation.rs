use std::fmt;

use serde::{Deserialize, Serialize};

/// Which checkpoint a deployment is currently serving. Monotonically
/// increasing: every accepted hotload produces the next generation, so
/// "never serve something older than intended" is an ordering comparison.
#[derive(
    Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct HotloadGeneration(u64);

impl fmt::Display for HotloadGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

impl From<HotloadGeneration> for u64 {
    fn from(generation: HotloadGeneration) -> Self {
        generation.0
    }
}

impl HotloadGeneration {
    pub fn from_u64(g: u64) -> Self {
        Self(g)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_is_greater() {
        let g = HotloadGeneration::from_u64(7);
        assert!(g.next() > g);
        assert_eq!(u64::from(g.next()), 8);
    }

    #[test]
    fn test_display() {
        assert_eq!(HotloadGeneration::from_u64(3).to_string(), "G3");
    }
}
