//! Iterative execution of a wrapped step with output feedback.

use serde_json::Value;
use std::sync::Arc;

use crate::errors::FlowError;
use crate::io::{Input, Output};
use crate::loader::LoadingStep;
use crate::logging::Logger;
use crate::utils::lazy;

use super::{OutputStream, Step};

/// Default iteration budget. Loops that never produce a stop signal
/// terminate here instead of spinning forever.
const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// Verdict of a feedback hook for one inner output.
#[derive(Debug, Clone)]
pub enum Feedback {
    /// Run another iteration with this value as the next input.
    Continue(Value),
    /// Discard any queued next input; the loop ends when the current
    /// iteration is drained.
    Stop,
}

enum OutputToInput {
    /// Next input is the full output, record and deferred data included.
    Passthrough,
    /// Next input value is derived by a closure; outputs mapped to
    /// `None` contribute no candidate.
    Func(Box<dyn Fn(&Input, &Output) -> Option<Value> + Send + Sync>),
    /// Next input value is the first output of a transformer step.
    Step(Box<dyn Step>),
}

/// Runs an inner step repeatedly, feeding outputs of one iteration back
/// in as the input of the next.
///
/// Every output of every iteration is yielded to the caller as it is
/// produced. By default the last output of an iteration becomes the
/// next input; a feedback hook or an output-to-input transformer can
/// override that.
pub struct LoopStep {
    inner: Box<dyn Step>,
    max_iterations: usize,
    output_to_input: OutputToInput,
    feedback: Option<Box<dyn Fn(&Input, &Output) -> Feedback + Send + Sync>>,
}

impl LoopStep {
    /// Wraps a step for iterative execution.
    #[must_use]
    pub fn new(step: impl Step + 'static) -> Self {
        Self {
            inner: Box::new(step),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            output_to_input: OutputToInput::Passthrough,
            feedback: None,
        }
    }

    /// Caps the number of iterations per invocation.
    #[must_use]
    pub fn max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Decides per output whether and with what value to continue.
    ///
    /// The latest verdict wins: a later [`Feedback::Continue`] replaces
    /// the queued input, a later [`Feedback::Stop`] withdraws it.
    #[must_use]
    pub fn with_feedback(
        mut self,
        feedback: impl Fn(&Input, &Output) -> Feedback + Send + Sync + 'static,
    ) -> Self {
        self.feedback = Some(Box::new(feedback));
        self
    }

    /// Derives the next iteration's input value from each output.
    #[must_use]
    pub fn output_to_input_fn(
        mut self,
        func: impl Fn(&Input, &Output) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.output_to_input = OutputToInput::Func(Box::new(func));
        self
    }

    /// Routes each output through a transformer step whose first output
    /// value becomes the next iteration's input.
    #[must_use]
    pub fn output_to_input_step(mut self, step: impl Step + 'static) -> Self {
        self.output_to_input = OutputToInput::Step(Box::new(step));
        self
    }
}

impl std::fmt::Debug for LoopStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopStep")
            .field("max_iterations", &self.max_iterations)
            .finish_non_exhaustive()
    }
}

impl Step for LoopStep {
    fn invoke_step<'a>(&'a self, input: Input) -> OutputStream<'a> {
        Box::new(lazy(move || {
            // A zero budget means the inner step never runs at all.
            if self.max_iterations == 0 {
                return Box::new(std::iter::empty()) as OutputStream<'a>;
            }

            let current = self.inner.invoke_step(input.clone());
            Box::new(LoopRun {
                step: self,
                current,
                current_input: input,
                next_input: None,
                iteration: 0,
                done: false,
            }) as OutputStream<'a>
        }))
    }

    fn set_use_input_key(&mut self, key: &str) {
        self.inner.set_use_input_key(key);
    }

    fn set_result_key(&mut self, key: &str) {
        self.inner.set_result_key(key);
    }

    fn result_key(&self) -> Option<String> {
        self.inner.result_key()
    }

    fn set_deferred_result_key(&mut self, key: Option<&str>) {
        self.inner.set_deferred_result_key(key);
    }

    fn set_cascades(&mut self, cascades: bool) {
        self.inner.set_cascades(cascades);
    }

    fn cascades(&self) -> bool {
        self.inner.cascades()
    }

    fn adds_to_or_creates_record(&self) -> bool {
        self.inner.adds_to_or_creates_record()
    }

    fn add_logger(&mut self, logger: Arc<dyn Logger>) {
        if let OutputToInput::Step(step) = &mut self.output_to_input {
            step.add_logger(Arc::clone(&logger));
        }
        self.inner.add_logger(logger);
    }

    fn reset_run_state(&self) {
        self.inner.reset_run_state();
        if let OutputToInput::Step(step) = &self.output_to_input {
            step.reset_run_state();
        }
    }

    fn refine_input(&self, input: Input, output: &Output) -> Input {
        self.inner.refine_input(input, output)
    }

    fn loading_mut(&mut self) -> Option<&mut dyn LoadingStep> {
        self.inner.loading_mut()
    }
}

struct LoopRun<'a> {
    step: &'a LoopStep,
    current: OutputStream<'a>,
    current_input: Input,
    next_input: Option<Input>,
    iteration: usize,
    done: bool,
}

impl LoopRun<'_> {
    fn track(&mut self, output: &Output) -> Result<(), FlowError> {
        if let Some(feedback) = &self.step.feedback {
            match feedback(&self.current_input, output) {
                Feedback::Continue(value) => {
                    // Feedback values stay on the lineage of the iteration
                    // they came from.
                    self.next_input = match self.current_input.record() {
                        Some(record) => Some(Input::with_record(value, record.clone())),
                        None => Some(Input::new(value)),
                    };
                }
                Feedback::Stop => self.next_input = None,
            }
            return Ok(());
        }

        match &self.step.output_to_input {
            OutputToInput::Passthrough => {
                self.next_input = Some(Input::from_output(output));
            }
            OutputToInput::Func(func) => {
                if let Some(value) = func(&self.current_input, output) {
                    self.next_input = Some(Input::new(value));
                }
            }
            OutputToInput::Step(transformer) => {
                let mut stream = transformer.invoke_step(Input::from_output(output));
                if let Some(item) = stream.next() {
                    self.next_input = Some(Input::new(item?.value().clone()));
                }
            }
        }
        Ok(())
    }
}

impl Iterator for LoopRun<'_> {
    type Item = Result<Output, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            match self.current.next() {
                Some(Ok(output)) => {
                    if let Err(e) = self.track(&output) {
                        self.done = true;
                        return Some(Err(e));
                    }
                    return Some(Ok(output));
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.iteration += 1;
                    if self.iteration >= self.step.max_iterations {
                        self.done = true;
                        return None;
                    }
                    match self.next_input.take() {
                        Some(input) => {
                            self.current_input = input.clone();
                            self.current = self.step.inner.invoke_step(input);
                        }
                        None => {
                            self.done = true;
                            return None;
                        }
                    }
                }
            }
        }
    }
}
