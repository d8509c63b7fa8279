use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::CompileError;

/// Install the stderr subscriber. `RUST_LOG` directives still apply on top of
/// the default level.
pub fn init_logging(default_level: tracing::Level) {
    let filter = EnvFilter::from_default_env().add_directive(default_level.into());
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_err()
    {
        eprintln!("Warning: logging system already initialized");
    }
}

/// Severity level used by build issues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// A single issue raised while compiling an asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

/// Author/revision metadata reported alongside the first warning of a build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub author: Option<String>,
    pub revision: Option<String>,
}

impl Provenance {
    fn describe(&self) -> Option<String> {
        match (&self.author, &self.revision) {
            (None, None) => None,
            (Some(author), None) => Some(format!("author {author}")),
            (None, Some(revision)) => Some(format!("revision {revision}")),
            (Some(author), Some(revision)) => {
                Some(format!("author {author}, revision {revision}"))
            }
        }
    }
}

/// Issue sink for one asset build. Every line it logs names the asset.
#[derive(Debug)]
pub struct Diagnostics {
    asset: String,
    provenance: Provenance,
    issues: Vec<Issue>,
    provenance_reported: bool,
}

impl Diagnostics {
    pub fn new(asset: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            asset: asset.into(),
            provenance,
            issues: Vec::new(),
            provenance_reported: false,
        }
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn warn(&mut self, code: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}: {}", self.asset, message);
        if !self.provenance_reported {
            self.provenance_reported = true;
            if let Some(provenance) = self.provenance.describe() {
                tracing::info!("{}: provenance {}", self.asset, provenance);
            }
        }
        self.push(Severity::Warning, code, message);
    }

    pub fn info(&mut self, code: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}: {}", self.asset, message);
        self.push(Severity::Info, code, message);
    }

    /// Record an overridable error as a warning instead of failing the build.
    pub fn demote(&mut self, error: &CompileError) {
        self.warn(error.code(), error.to_string());
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Warning)
            .count()
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<Issue> {
        self.issues
    }

    fn push(&mut self, severity: Severity, code: &str, message: String) {
        self.issues.push(Issue {
            severity,
            code: code.to_string(),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_demoted_error_when_recorded_then_issue_is_a_warning_with_error_code() {
        let mut diagnostics = Diagnostics::new(
            "crate",
            Provenance {
                author: Some("level design".to_string()),
                revision: Some("12".to_string()),
            },
        );
        diagnostics.demote(&CompileError::CostlyCollisionModel {
            owner: "solid \"crate\"".to_string(),
            pieces: 41,
            allowed: 40,
        });
        diagnostics.info("stats", "1 solid");

        assert_eq!(diagnostics.warning_count(), 1);
        let issue = &diagnostics.issues()[0];
        assert_eq!(issue.severity, Severity::Warning);
        assert_eq!(issue.code, "costly_collision_model");
        assert!(diagnostics.provenance_reported);
    }

    #[test]
    fn given_partial_provenance_when_described_then_only_known_fields_appear() {
        let provenance = Provenance {
            author: None,
            revision: Some("r7".to_string()),
        };
        assert_eq!(provenance.describe().as_deref(), Some("revision r7"));
        assert_eq!(Provenance::default().describe(), None);
    }
}
