//! The pipeline driver.

use serde_json::Value;
use std::sync::Arc;

use crate::errors::FlowError;
use crate::io::{Input, Output, Record};
use crate::loader::Loader;
use crate::logging::{Logger, TracingLogger};
use crate::steps::{OutputStream, Step, UNNAMED_KEY};
use crate::store::Store;
use crate::utils::{lazy, Concat};

/// Hook observing every output a step produces during a run, together
/// with the step's position in the pipeline.
pub type OutputHook = Box<dyn Fn(&Output, usize, &dyn Step) + Send + Sync>;

/// Drives a linear pipeline of steps over seed inputs and assembles the
/// final records.
///
/// Construction is mutation, execution is not: once [`Crawler::run`] is
/// called the pipeline is driven through `&self`, pulling outputs through
/// the step chain one at a time. Seeds queued via [`Crawler::input`] are
/// consumed by the next run, so a crawler instance can be reused for
/// independent runs.
pub struct Crawler {
    steps: Vec<Box<dyn Step>>,
    seeds: Vec<Input>,
    loader: Option<Arc<dyn Loader>>,
    store: Option<Box<dyn Store>>,
    logger: Arc<dyn Logger>,
    output_hook: Option<OutputHook>,
}

impl Crawler {
    /// Creates a driver with no steps and no seeds, logging through
    /// [`TracingLogger`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            seeds: Vec::new(),
            loader: None,
            store: None,
            logger: Arc::new(TracingLogger),
            output_hook: None,
        }
    }

    /// Queues one seed input for the next run.
    pub fn input(&mut self, value: impl Into<Value>) -> &mut Self {
        self.seeds.push(Input::new(value));
        self
    }

    /// Queues several seed inputs for the next run.
    pub fn inputs(&mut self, values: impl IntoIterator<Item = Value>) -> &mut Self {
        self.seeds.extend(values.into_iter().map(Input::new));
        self
    }

    /// Appends a step to the pipeline.
    ///
    /// The driver's logger and loader are handed to the step once, at
    /// registration.
    pub fn add_step(&mut self, step: impl Step + 'static) -> &mut Self {
        self.register(Box::new(step));
        self
    }

    /// Appends a step that contributes its outputs to the record under
    /// the given key, unless the step already carries an explicit one.
    ///
    /// # Errors
    ///
    /// Fails with [`FlowError::InvalidStep`] for an empty key.
    pub fn add_keyed_step(
        &mut self,
        key: &str,
        step: impl Step + 'static,
    ) -> Result<&mut Self, FlowError> {
        if key.is_empty() {
            return Err(FlowError::InvalidStep(
                "result key must not be empty".to_string(),
            ));
        }

        let mut step = Box::new(step);
        if step.result_key().is_none() {
            step.set_result_key(key);
        }
        self.register(step);
        Ok(self)
    }

    fn register(&mut self, mut step: Box<dyn Step>) {
        step.add_logger(Arc::clone(&self.logger));
        if let Some(loader) = &self.loader {
            if let Some(loading) = step.loading_mut() {
                loading.add_loader(Arc::clone(loader));
            }
        }
        self.steps.push(step);
    }

    /// Sets the loader handed to loading-capable steps.
    pub fn set_loader(&mut self, loader: Arc<dyn Loader>) -> &mut Self {
        for step in &mut self.steps {
            if let Some(loading) = step.loading_mut() {
                loading.add_loader(Arc::clone(&loader));
            }
        }
        self.loader = Some(loader);
        self
    }

    /// Sets the store that receives every finished record.
    pub fn set_store(&mut self, mut store: impl Store + 'static) -> &mut Self {
        store.add_logger(Arc::clone(&self.logger));
        self.store = Some(Box::new(store));
        self
    }

    /// Replaces the logger and forwards it to everything already
    /// registered.
    pub fn set_logger(&mut self, logger: Arc<dyn Logger>) -> &mut Self {
        for step in &mut self.steps {
            step.add_logger(Arc::clone(&logger));
        }
        if let Some(store) = &mut self.store {
            store.add_logger(Arc::clone(&logger));
        }
        self.logger = logger;
        self
    }

    /// Installs a hook observing every output of every step.
    pub fn output_hook(
        &mut self,
        hook: impl Fn(&Output, usize, &dyn Step) + Send + Sync + 'static,
    ) -> &mut Self {
        self.output_hook = Some(Box::new(hook));
        self
    }

    /// Runs the pipeline over all queued seeds, yielding finished records.
    ///
    /// Seeds are consumed, uniqueness state is cleared, and records are
    /// finalized seed by seed: each seed's records are deduplicated by
    /// identity, handed to the store, then yielded. A fault aborts the
    /// seed that caused it; remaining seeds still run.
    pub fn run<'a>(&'a mut self) -> impl Iterator<Item = Result<Record, FlowError>> + 'a {
        let seeds = std::mem::take(&mut self.seeds);
        for step in &self.steps {
            step.reset_run_state();
        }
        self.logger
            .info(&format!("run started with {} seed input(s)", seeds.len()));

        let this: &'a Self = self;
        let batches: Vec<Box<dyn Iterator<Item = Result<Record, FlowError>> + 'a>> = seeds
            .into_iter()
            .map(|seed| {
                Box::new(lazy(move || {
                    Box::new(this.run_seed(seed).into_iter())
                        as Box<dyn Iterator<Item = Result<Record, FlowError>> + 'a>
                })) as Box<dyn Iterator<Item = Result<Record, FlowError>> + 'a>
            })
            .collect();
        Concat::new(batches)
    }

    /// Runs the pipeline for its side effects, discarding records.
    ///
    /// # Errors
    ///
    /// Returns the first fault encountered, after all seeds have run.
    pub fn run_and_traverse(&mut self) -> Result<(), FlowError> {
        let mut first_fault = None;
        for item in self.run() {
            if let Err(e) = item {
                first_fault.get_or_insert(e);
            }
        }
        first_fault.map_or(Ok(()), Err)
    }

    /// Drains one seed through the whole chain and finalizes its records.
    fn run_seed(&self, seed: Input) -> Vec<Result<Record, FlowError>> {
        let mut records: Vec<Record> = Vec::new();

        for item in self.outputs_for(seed, 0) {
            let output = match item {
                Ok(output) => output,
                Err(e) => {
                    self.logger.warn(&format!("seed aborted: {e}"));
                    return vec![Err(e)];
                }
            };

            let record = match output.record() {
                Some(record) => record.clone(),
                None => record_from_output(&output),
            };
            // Many final outputs can share one record; keep it once.
            if !records.iter().any(|known| known.same_record(&record)) {
                records.push(record);
            }
        }

        records
            .into_iter()
            .map(|record| {
                if let Some(store) = &self.store {
                    store.store(&record)?;
                }
                Ok(record)
            })
            .collect()
    }

    /// Lazily pulls the outputs of the chain suffix starting at `index`
    /// for one input.
    fn outputs_for<'a>(&'a self, input: Input, index: usize) -> OutputStream<'a> {
        let Some(step) = self.steps.get(index) else {
            let output = Output::assembled(
                input.value().clone(),
                input.record().cloned(),
                input.deferred().clone(),
            );
            return Box::new(std::iter::once(Ok(output)));
        };

        let hook = self.output_hook.as_ref();
        let observed = step.invoke_step(input.clone()).map(move |item| {
            if let (Ok(output), Some(hook)) = (&item, hook) {
                hook(output, index, step.as_ref());
            }
            item
        });

        if step.cascades() {
            return Box::new(observed.flat_map(move |item| match item {
                Ok(output) => self.outputs_for(Input::from_output(&output), index + 1),
                Err(e) => Box::new(std::iter::once(Err(e))) as OutputStream<'a>,
            }));
        }

        // Side effects only: drain the step and hand its own input on.
        Box::new(lazy(move || {
            for item in observed {
                if let Err(e) = item {
                    return Box::new(std::iter::once(Err(e))) as OutputStream<'a>;
                }
            }
            self.outputs_for(input, index + 1)
        }))
    }
}

impl Default for Crawler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("steps", &self.steps.len())
            .field("seeds", &self.seeds.len())
            .finish_non_exhaustive()
    }
}

/// Builds the fallback record for a final output that never touched one.
fn record_from_output(output: &Output) -> Record {
    if !output.deferred().is_empty() {
        return Record::from_map(output.deferred());
    }

    let record = Record::new();
    match output.value() {
        Value::Object(map) => record.splice(map),
        other => record.set(UNNAMED_KEY, other.clone()),
    }
    record
}
