#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A correspondence of the same feature between image A and image B.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct FeatureMatch<P>(pub P, pub P);

impl<P> FeatureMatch<P> {
    /// Applies `f` to both sides of the match.
    pub fn map<Q>(self, mut f: impl FnMut(P) -> Q) -> FeatureMatch<Q> {
        let FeatureMatch(a, b) = self;
        FeatureMatch(f(a), f(b))
    }
}
