//! Recoverable-condition channel (spec.md §7: "Diagnostics are a separate,
//! accumulating channel so that warnings do not masquerade as errors")

use std::fmt;

/// Severity of a recoverable condition. Nothing here is ever fatal —
/// fatal conditions are `CompileError`, not `Diagnostic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

/// A single recoverable condition recorded by a pipeline stage.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub stage: &'static str,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn info(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            severity: Severity::Info,
            message: message.into(),
        }
    }

    pub fn warning(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
        };
        write!(f, "[{level}] {}: {}", self.stage, self.message)
    }
}

/// An append-only accumulator threaded through the pipeline. Every stage
/// takes a `&mut DiagnosticSink` and pushes to it instead of returning
/// warnings out of band.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Warning => tracing::warn!(stage = diagnostic.stage, "{}", diagnostic.message),
            Severity::Info => tracing::info!(stage = diagnostic.stage, "{}", diagnostic.message),
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn info(&mut self, stage: &'static str, message: impl Into<String>) {
        self.push(Diagnostic::info(stage, message));
    }

    pub fn warning(&mut self, stage: &'static str, message: impl Into<String>) {
        self.push(Diagnostic::warning(stage, message));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn extend(&mut self, other: DiagnosticSink) {
        self.diagnostics.extend(other.diagnostics);
    }
}
