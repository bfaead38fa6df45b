//! A closure-based step.

use serde_json::Value;
use std::sync::Arc;

use crate::errors::FlowError;
use crate::io::{Input, Output};
use crate::logging::Logger;
use crate::utils::lazy;

use super::{OutputFilter, OutputStream, Step, StepConfig};

type Transform = Box<dyn Fn(&Value) -> Result<Vec<Value>, FlowError> + Send + Sync>;

/// A step whose transform is a plain closure.
///
/// The closure receives the resolved input value and returns the raw
/// values to emit; the shared step protocol (uniqueness, filters, record
/// contribution) is applied around it. The transform runs on first pull,
/// not at invocation time.
pub struct FnStep {
    config: StepConfig,
    transform: Transform,
}

impl FnStep {
    /// Creates a step from a transform closure.
    #[must_use]
    pub fn new(
        transform: impl Fn(&Value) -> Result<Vec<Value>, FlowError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            config: StepConfig::new(),
            transform: Box::new(transform),
        }
    }

    /// Creates a step that emits the given value once per input.
    #[must_use]
    pub fn value(value: Value) -> Self {
        Self::new(move |_| Ok(vec![value.clone()]))
    }

    /// Creates a step that emits its resolved input value unchanged.
    #[must_use]
    pub fn passthrough() -> Self {
        Self::new(|input| Ok(vec![input.clone()]))
    }

    /// Restricts the step to one key of a mapping input value.
    #[must_use]
    pub fn use_input_key(mut self, key: &str) -> Self {
        self.config.set_use_input_key(key);
        self
    }

    /// Contribute outputs to the record, optionally under an explicit key.
    #[must_use]
    pub fn add_to_result(mut self, key: Option<&str>) -> Self {
        match key {
            Some(key) => self.config.set_result_key(key),
            None => self.config.add_to_result(),
        }
        self
    }

    /// Stage outputs as deferred result data.
    #[must_use]
    pub fn add_later_to_result(mut self, key: Option<&str>) -> Self {
        self.config.add_later_to_result(key);
        self
    }

    /// Skip duplicate resolved inputs for the lifetime of a run.
    #[must_use]
    pub fn unique_inputs(mut self) -> Self {
        self.config.set_unique_input(true);
        self
    }

    /// Drop duplicate output values for the lifetime of a run.
    #[must_use]
    pub fn unique_outputs(mut self) -> Self {
        self.config.set_unique_output(true);
        self
    }

    /// Compute outputs for side effects only, excluded from composition.
    #[must_use]
    pub fn dont_cascade(mut self) -> Self {
        self.config.set_cascades(false);
        self
    }

    /// Splice the raw input value into every output.
    #[must_use]
    pub fn keep_input_data(mut self, key: Option<&str>) -> Self {
        self.config.set_keep_input_data(key);
        self
    }

    /// Adds an output filter.
    #[must_use]
    pub fn filter(mut self, filter: OutputFilter) -> Self {
        self.config.add_filter(filter);
        self
    }

    /// Sets the hook a surrounding group uses to refine the input for
    /// subsequent sibling steps.
    #[must_use]
    pub fn update_input_using_output(
        mut self,
        refiner: impl Fn(&Input, &Output) -> Input + Send + Sync + 'static,
    ) -> Self {
        self.config.set_input_refiner(refiner);
        self
    }
}

impl std::fmt::Debug for FnStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Step for FnStep {
    fn invoke_step<'a>(&'a self, input: Input) -> OutputStream<'a> {
        let Some(input) = self.config.prepare_input(input) else {
            return Box::new(std::iter::empty());
        };

        let value = input.value().clone();
        let raw = Box::new(lazy(move || {
            let items: Vec<Result<Value, FlowError>> = match (self.transform)(&value) {
                Ok(values) => values.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            Box::new(items.into_iter()) as Box<dyn Iterator<Item = Result<Value, FlowError>> + 'a>
        }));

        self.config.assemble(input, raw)
    }

    fn set_use_input_key(&mut self, key: &str) {
        self.config.set_use_input_key(key);
    }

    fn set_result_key(&mut self, key: &str) {
        self.config.set_result_key(key);
    }

    fn result_key(&self) -> Option<String> {
        self.config.result_key()
    }

    fn set_deferred_result_key(&mut self, key: Option<&str>) {
        self.config.add_later_to_result(key);
    }

    fn set_cascades(&mut self, cascades: bool) {
        self.config.set_cascades(cascades);
    }

    fn cascades(&self) -> bool {
        self.config.cascades()
    }

    fn adds_to_or_creates_record(&self) -> bool {
        self.config.adds_to_or_creates_record()
    }

    fn add_logger(&mut self, logger: Arc<dyn Logger>) {
        self.config.set_logger(logger);
    }

    fn reset_run_state(&self) {
        self.config.reset_run_state();
    }

    fn refine_input(&self, input: Input, output: &Output) -> Input {
        self.config.refine_input(input, output)
    }
}
