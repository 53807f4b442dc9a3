#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Nesting limit applied by [`EvalPolicy::strict`] and [`EvalPolicy::lenient`].
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// What integer arithmetic does when a result leaves the `i64` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    #[default]
    Error,
    PromoteToFloat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalPolicy {
    pub overflow: OverflowMode,
    pub max_depth: Option<usize>,
}

impl EvalPolicy {
    #[must_use]
    pub fn strict() -> Self {
        Self {
            overflow: OverflowMode::Error,
            max_depth: Some(DEFAULT_MAX_DEPTH),
        }
    }

    #[must_use]
    pub fn lenient() -> Self {
        Self {
            overflow: OverflowMode::PromoteToFloat,
            max_depth: Some(DEFAULT_MAX_DEPTH),
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Parse a policy from JSON. Missing fields take their strict defaults.
    pub fn from_json_str(body: &str) -> Result<Self, PolicyError> {
        let policy: Self = serde_json::from_str(body)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_depth == Some(0) {
            return Err(PolicyError::ZeroDepth);
        }
        Ok(())
    }

    /// `true` while a walk at `depth` stays inside the configured limit.
    #[must_use]
    pub fn allows_depth(&self, depth: usize) -> bool {
        self.max_depth.is_none_or(|limit| depth < limit)
    }

    #[must_use]
    pub fn promotes_overflow(&self) -> bool {
        matches!(self.overflow, OverflowMode::PromoteToFloat)
    }
}

impl Default for EvalPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("max_depth must be at least 1 when set")]
    ZeroDepth,
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_MAX_DEPTH, EvalPolicy, OverflowMode, PolicyError};

    #[test]
    fn default_policy_is_strict() {
        let policy = EvalPolicy::default();
        assert_eq!(policy, EvalPolicy::strict());
        assert_eq!(policy.overflow, OverflowMode::Error);
        assert_eq!(policy.max_depth, Some(DEFAULT_MAX_DEPTH));
        assert!(!policy.promotes_overflow());
    }

    #[test]
    fn lenient_policy_promotes_overflow() {
        assert!(EvalPolicy::lenient().promotes_overflow());
    }

    #[test]
    fn depth_limit_is_exclusive() {
        let policy = EvalPolicy::strict().with_max_depth(Some(2));
        assert!(policy.allows_depth(0));
        assert!(policy.allows_depth(1));
        assert!(!policy.allows_depth(2));

        let unbounded = EvalPolicy::strict().with_max_depth(None);
        assert!(unbounded.allows_depth(usize::MAX));
    }

    #[test]
    fn json_fields_default_to_strict_values() {
        let policy =
            EvalPolicy::from_json_str(r#"{"overflow":"promote_to_float"}"#).expect("parse");
        assert_eq!(policy.overflow, OverflowMode::PromoteToFloat);
        assert_eq!(policy.max_depth, Some(DEFAULT_MAX_DEPTH));

        let empty = EvalPolicy::from_json_str("{}").expect("parse");
        assert_eq!(empty, EvalPolicy::strict());

        let unbounded = EvalPolicy::from_json_str(r#"{"max_depth":null}"#).expect("parse");
        assert_eq!(unbounded.max_depth, None);
    }

    #[test]
    fn json_rejects_zero_depth_and_bad_modes() {
        let err = EvalPolicy::from_json_str(r#"{"max_depth":0}"#).expect_err("zero depth");
        assert!(matches!(err, PolicyError::ZeroDepth));

        let err = EvalPolicy::from_json_str(r#"{"overflow":"wrap"}"#).expect_err("bad mode");
        assert!(matches!(err, PolicyError::Json(_)));
    }
}
