//! Band-join constraints.
//!
//! A constraint on a tree edge states that the child's join attribute lies
//! in an interval around the parent's:
//!
//! ```text
//! child.attr ∈ [parent.attr + δ₁, parent.attr + δ₂]
//! ```
//!
//! with each endpoint independently open or closed, and `±∞` representable
//! by sentinel deviations. Equality joins are the degenerate band
//! `[0, 0]` with both endpoints closed; one-sided inequalities use an
//! infinite endpoint.

use serde::{Deserialize, Serialize};

use crate::tuple::Openness;

/// One interval endpoint: a deviation from the parent's attribute plus the
/// endpoint's openness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bound {
    pub deviation: i64,
    pub openness: Openness,
}

impl Bound {
    /// `-∞`: always satisfied as a lower endpoint.
    pub const NEG_INF: Bound = Bound {
        deviation: i64::MIN,
        openness: Openness::Closed,
    };

    /// `+∞`: always satisfied as an upper endpoint.
    pub const POS_INF: Bound = Bound {
        deviation: i64::MAX,
        openness: Openness::Closed,
    };

    pub fn closed(deviation: i64) -> Bound {
        Bound {
            deviation,
            openness: Openness::Closed,
        }
    }

    pub fn open(deviation: i64) -> Bound {
        Bound {
            deviation,
            openness: Openness::Open,
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.deviation == i64::MIN || self.deviation == i64::MAX
    }

    /// The mirrored endpoint: an upper bound becomes a lower bound with
    /// flipped sign (and vice versa), keeping its openness.
    fn negate(&self) -> Bound {
        let deviation = match self.deviation {
            i64::MIN => i64::MAX,
            i64::MAX => i64::MIN,
            d => -d,
        };
        Bound {
            deviation,
            openness: self.openness,
        }
    }

    /// Endpoint parameters as consumed by boundary-construction opcodes.
    /// Infinite endpoints are forced closed: saturating arithmetic pins
    /// them at the extremes of the attribute domain, where the endpoint is
    /// always on the inside.
    pub fn params(&self) -> (i64, Openness) {
        if self.is_infinite() {
            (self.deviation, Openness::Closed)
        } else {
            (self.deviation, self.openness)
        }
    }
}

/// One edge of the join tree, expressed from the child's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinConstraint {
    /// Column of the parent relation the band is anchored on.
    pub parent_column: String,
    /// Column of the child relation being constrained.
    pub child_column: String,
    pub lower: Bound,
    pub upper: Bound,
}

impl JoinConstraint {
    pub fn new<S: Into<String>>(
        parent_column: S,
        child_column: S,
        lower: Bound,
        upper: Bound,
    ) -> JoinConstraint {
        JoinConstraint {
            parent_column: parent_column.into(),
            child_column: child_column.into(),
            lower,
            upper,
        }
    }

    /// `child.attr = parent.attr`.
    pub fn equality<S: Into<String>>(parent_column: S, child_column: S) -> JoinConstraint {
        JoinConstraint::new(parent_column, child_column, Bound::closed(0), Bound::closed(0))
    }

    /// `child.attr ∈ parent.attr + [lower, upper]` with configurable
    /// endpoint closedness.
    pub fn band<S: Into<String>>(
        parent_column: S,
        child_column: S,
        lower: i64,
        upper: i64,
        lower_inclusive: bool,
        upper_inclusive: bool,
    ) -> JoinConstraint {
        let lo = if lower_inclusive {
            Bound::closed(lower)
        } else {
            Bound::open(lower)
        };
        let hi = if upper_inclusive {
            Bound::closed(upper)
        } else {
            Bound::open(upper)
        };
        JoinConstraint::new(parent_column, child_column, lo, hi)
    }

    /// Swap the roles of the two relations.
    ///
    /// `c ∈ p + [δ₁, δ₂]` holds exactly when `p ∈ c + [-δ₂, -δ₁]`, each
    /// endpoint keeping its openness. The top-down phase uses this to build
    /// child-side boundaries from a child-perspective constraint.
    pub fn reverse(&self) -> JoinConstraint {
        JoinConstraint {
            parent_column: self.child_column.clone(),
            child_column: self.parent_column.clone(),
            lower: self.upper.negate(),
            upper: self.lower.negate(),
        }
    }

    /// `(δ₁, δ₂, openness₁, openness₂)` for boundary synthesis.
    pub fn params(&self) -> (i64, i64, Openness, Openness) {
        let (d1, o1) = self.lower.params();
        let (d2, o2) = self.upper.params();
        (d1, d2, o1, o2)
    }

    /// Whether a concrete pair of attribute values satisfies the band.
    /// Used by validation tooling and the test reference executor; the
    /// oblivious phases never evaluate it per-pair.
    pub fn matches(&self, parent_attr: i64, child_attr: i64) -> bool {
        let lower_ok = if self.lower.deviation == i64::MIN {
            true
        } else {
            let lo = parent_attr.saturating_add(self.lower.deviation);
            match self.lower.openness {
                Openness::Open => child_attr > lo,
                _ => child_attr >= lo,
            }
        };
        let upper_ok = if self.upper.deviation == i64::MAX {
            true
        } else {
            let hi = parent_attr.saturating_add(self.upper.deviation);
            match self.upper.openness {
                Openness::Open => child_attr < hi,
                _ => child_attr <= hi,
            }
        };
        lower_ok && upper_ok
    }
}
