//! Explicit stage interface (spec.md §9, "Coroutine-style control flow").
//!
//! The prior-art pipeline was a chain of plain function calls; here each
//! pipeline step implements `Stage<In, Out>` so that, e.g., a slow
//! reference Pattern Detector and a fast parallel one (`nesmidi-pattern`)
//! can be swapped without the upstream Frame Generator or downstream Code
//! Emitter knowing the difference.

use crate::diagnostics::DiagnosticSink;
use crate::error::Result;

/// A single, independently-testable pipeline stage.
///
/// Stages are pure functions over immutable inputs (spec.md §5): no
/// stage holds state across calls, and `diagnostics` is the only
/// side channel.
pub trait Stage<In, Out> {
    fn run(&self, input: In, diagnostics: &mut DiagnosticSink) -> Result<Out>;
}
