//! Step trait and implementations.
//!
//! Steps are the pipeline stages of scrapeflow: each one transforms an
//! [`Input`] into a lazy, finite, non-restartable sequence of [`Output`]s.
//! Composite steps ([`Group`], [`LoopStep`]) consume other steps through
//! the same contract, so any step is interchangeable with any other from
//! a caller's perspective.

mod base;
mod filters;
mod fn_step;
mod group;
mod loading;
mod loop_step;

pub use base::StepConfig;
pub(crate) use base::UNNAMED_KEY;
pub use filters::OutputFilter;
pub use fn_step::FnStep;
pub use group::Group;
pub use loading::LoadStep;
pub use loop_step::{Feedback, LoopStep};

use std::sync::Arc;

use crate::errors::FlowError;
use crate::io::{Input, Output};
use crate::loader::LoadingStep;
use crate::logging::Logger;

/// The lazy output sequence of one step invocation.
///
/// Finite, produced incrementally, and never restartable. Faults appear
/// as `Err` items and terminate the sequence.
pub type OutputStream<'a> = Box<dyn Iterator<Item = Result<Output, FlowError>> + 'a>;

/// Trait for pipeline steps.
///
/// Configuration setters take `&mut self` and are meant for pipeline
/// construction time; `invoke_step` runs against `&self`, so a composed
/// pipeline can be driven without further mutation. Per-run mutable state
/// (the uniqueness fingerprint sets) lives behind interior mutability and
/// is cleared through [`Step::reset_run_state`].
pub trait Step: Send + Sync {
    /// Invokes the step with an input, lazily producing outputs.
    fn invoke_step<'a>(&'a self, input: Input) -> OutputStream<'a>;

    /// Restricts the step to one key of a mapping input value.
    fn set_use_input_key(&mut self, key: &str);

    /// Makes the step contribute its output to the lineage's record under
    /// an explicit key.
    fn set_result_key(&mut self, key: &str);

    /// The explicit result key, if one is set.
    fn result_key(&self) -> Option<String>;

    /// Makes the step stage its output as deferred result data, merged
    /// into every record created downstream, optionally under a key.
    fn set_deferred_result_key(&mut self, key: Option<&str>);

    /// Controls whether the step's outputs take part in downstream
    /// composition. Non-cascading steps are computed for their side
    /// effects only.
    fn set_cascades(&mut self, cascades: bool);

    /// Whether the step's outputs cascade.
    fn cascades(&self) -> bool;

    /// Whether invoking this step contributes to or creates a record.
    fn adds_to_or_creates_record(&self) -> bool;

    /// Attaches a logger; composite steps forward it to the steps they
    /// own, exactly once per registration.
    fn add_logger(&mut self, logger: Arc<dyn Logger>);

    /// Clears run-lifetime state (the uniqueness fingerprint sets) so a
    /// reused step instance starts an independent run.
    fn reset_run_state(&self);

    /// Applies the step's input-adjustment hook, if one is configured.
    ///
    /// Called by a surrounding [`Group`] after each of this step's
    /// outputs to refine the input handed to subsequent siblings. The
    /// default is a pass-through.
    fn refine_input(&self, input: Input, _output: &Output) -> Input {
        input
    }

    /// Narrow capability probe: steps that accept a loader return
    /// themselves as a [`LoadingStep`] here.
    fn loading_mut(&mut self) -> Option<&mut dyn LoadingStep> {
        None
    }
}
