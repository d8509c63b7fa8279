use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Broad class of a compile failure, used to decide demotion and exit policy.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unknown names, malformed sources, bad directives. Always fatal.
    Input,
    /// Degenerate or costly collision geometry. Demotable by an override flag.
    Geometry,
    /// Invariant violations that indicate a pathological asset or a bug.
    Internal,
}

/// Every failure the compiler can raise while building one asset.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("unresolved bone \"{name}\" referenced by {context}")]
    UnresolvedBone { name: String, context: String },

    #[error("too many bones ({count}, limit {limit})")]
    TooManyBones { count: usize, limit: usize },

    #[error("malformed source {}: {reason}", path.display())]
    MalformedSource { path: PathBuf, reason: String },

    #[error("missing animation frames in clip \"{clip}\": {reason}")]
    MissingFrames { clip: String, reason: String },

    #[error("invalid directive: {reason}")]
    InvalidDirective { reason: String },

    #[error("invalid constraint on bone \"{joint}\": {reason}")]
    InvalidConstraint { joint: String, reason: String },

    #[error("{owner} has 2-dimensional geometry (less than 1 unit thick on any axis)")]
    NearPlanar { owner: String },

    #[error("{owner} produced a degenerate convex hull")]
    DegenerateHull { owner: String },

    #[error("costly collision model in {owner} ({pieces} parts - {allowed} allowed)")]
    CostlyCollisionModel {
        owner: String,
        pieces: usize,
        allowed: usize,
    },

    #[error("internal error: circular hierarchy involving bone \"{bone}\"")]
    CircularHierarchy { bone: String },

    #[error("internal error: bone collapse cycle merging \"{child}\" into \"{parent}\"")]
    CollapseCycle { child: String, parent: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CompileError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CompileError::UnresolvedBone { .. }
            | CompileError::TooManyBones { .. }
            | CompileError::MalformedSource { .. }
            | CompileError::MissingFrames { .. }
            | CompileError::InvalidDirective { .. }
            | CompileError::InvalidConstraint { .. } => ErrorCategory::Input,
            CompileError::NearPlanar { .. }
            | CompileError::DegenerateHull { .. }
            | CompileError::CostlyCollisionModel { .. } => ErrorCategory::Geometry,
            CompileError::CircularHierarchy { .. }
            | CompileError::CollapseCycle { .. }
            | CompileError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Short stable identifier used in reports and issue lists.
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::UnresolvedBone { .. } => "unresolved_bone",
            CompileError::TooManyBones { .. } => "too_many_bones",
            CompileError::MalformedSource { .. } => "malformed_source",
            CompileError::MissingFrames { .. } => "missing_frames",
            CompileError::InvalidDirective { .. } => "invalid_directive",
            CompileError::InvalidConstraint { .. } => "invalid_constraint",
            CompileError::NearPlanar { .. } => "near_planar",
            CompileError::DegenerateHull { .. } => "degenerate_hull",
            CompileError::CostlyCollisionModel { .. } => "costly_collision_model",
            CompileError::CircularHierarchy { .. } => "circular_hierarchy",
            CompileError::CollapseCycle { .. } => "collapse_cycle",
            CompileError::Internal(_) => "internal",
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_internal_failures_when_displayed_then_they_carry_internal_prefix() {
        let err = CompileError::CircularHierarchy {
            bone: "spine".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Internal);
        assert!(err.to_string().starts_with("internal error:"));

        let err = CompileError::CollapseCycle {
            child: "a".to_string(),
            parent: "b".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Internal);
        assert!(err.to_string().starts_with("internal error:"));
    }

    #[test]
    fn given_costly_model_when_displayed_then_counts_are_reported() {
        let err = CompileError::CostlyCollisionModel {
            owner: "solid \"crate\"".to_string(),
            pieces: 41,
            allowed: 40,
        };
        assert_eq!(err.category(), ErrorCategory::Geometry);
        assert!(err.to_string().contains("41 parts - 40 allowed"));
        assert_eq!(err.code(), "costly_collision_model");
    }
}
