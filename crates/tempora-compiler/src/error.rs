//! Error types for tempora-compiler
//!
//! Compilation never stops at the first problem: independent branches are
//! still compiled so that one build reports every offending composition site.

use serde::{Deserialize, Serialize};
use std::fmt;
use tempora_core::PartitionId;
use thiserror::Error;

/// Path from the root of a behavior description to one composition site
///
/// Rendered as steps joined by ` / `, e.g. `then[1] / product.left / zip`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Site(Vec<String>);

impl Site {
    /// The root of the description
    pub fn root() -> Self {
        Self::default()
    }

    /// The site one step below this one
    pub fn child(&self, step: impl Into<String>) -> Self {
        let mut steps = self.0.clone();
        steps.push(step.into());
        Self(steps)
    }

    /// Steps from the root
    pub fn steps(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        write!(f, "{}", self.0.join(" / "))
    }
}

/// A single compile-time structural error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("type mismatch at {site}: expected {expected}, found {found}")]
    TypeMismatch {
        site: Site,
        expected: String,
        found: String,
    },

    #[error("negative delay {value} at {site}")]
    NegativeDelay { site: Site, value: i64 },

    #[error("unreconcilable delay at {site}: {detail}")]
    UnreconcilableDelay { site: Site, detail: String },

    #[error("illegal placement at {site}: expected partition {expected}, found {found}")]
    IllegalPlacement {
        site: Site,
        expected: PartitionId,
        found: PartitionId,
    },
}

impl CompileError {
    /// Composition site the error was reported at
    pub fn site(&self) -> &Site {
        match self {
            CompileError::TypeMismatch { site, .. }
            | CompileError::NegativeDelay { site, .. }
            | CompileError::UnreconcilableDelay { site, .. }
            | CompileError::IllegalPlacement { site, .. } => site,
        }
    }
}

/// Every error found while compiling one behavior
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", Self::format_errors(.0))]
pub struct CompileErrors(pub Vec<CompileError>);

impl CompileErrors {
    /// Number of errors
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no errors
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the errors in the order they were found
    pub fn iter(&self) -> impl Iterator<Item = &CompileError> {
        self.0.iter()
    }

    /// Take ownership of the error list
    pub fn into_inner(self) -> Vec<CompileError> {
        self.0
    }

    fn format_errors(errors: &[CompileError]) -> String {
        let header = if errors.len() == 1 {
            "1 compile error".to_string()
        } else {
            format!("{} compile errors", errors.len())
        };
        errors
            .iter()
            .fold(header, |acc, e| format!("{}\n  - {}", acc, e))
    }
}

impl<'a> IntoIterator for &'a CompileErrors {
    type Item = &'a CompileError;
    type IntoIter = std::slice::Iter<'a, CompileError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Result type for compilation
pub type Result<T> = std::result::Result<T, CompileErrors>;
