//! A leaf step that delegates to a loader collaborator.

use serde_json::Value;
use std::sync::Arc;

use crate::errors::FlowError;
use crate::io::{Input, Output};
use crate::loader::{Loader, LoadingStep};
use crate::logging::Logger;
use crate::utils::lazy;

use super::{OutputFilter, OutputStream, Step, StepConfig};

type RequestBuilder = Box<dyn Fn(&Value) -> Value + Send + Sync>;

/// A step that turns its resolved input value into a request, hands it to
/// the registered [`Loader`], and emits the response as one output.
///
/// Invoking a `LoadStep` without a loader is a fault, not a silent skip.
pub struct LoadStep {
    config: StepConfig,
    loader: Option<Arc<dyn Loader>>,
    request: Option<RequestBuilder>,
}

impl LoadStep {
    /// Creates a load step that passes the resolved input value through as
    /// the request.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: StepConfig::new(),
            loader: None,
            request: None,
        }
    }

    /// Sets a closure building the request from the resolved input value.
    #[must_use]
    pub fn with_request(mut self, request: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.request = Some(Box::new(request));
        self
    }

    /// Restricts the step to one key of a mapping input value.
    #[must_use]
    pub fn use_input_key(mut self, key: &str) -> Self {
        self.config.set_use_input_key(key);
        self
    }

    /// Contribute responses to the record, optionally under a key.
    #[must_use]
    pub fn add_to_result(mut self, key: Option<&str>) -> Self {
        match key {
            Some(key) => self.config.set_result_key(key),
            None => self.config.add_to_result(),
        }
        self
    }

    /// Skip duplicate requests for the lifetime of a run.
    #[must_use]
    pub fn unique_inputs(mut self) -> Self {
        self.config.set_unique_input(true);
        self
    }

    /// Splice the request value into every response.
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

    fn build_request(&self, resolved: &Value) -> Value {
        match &self.request {
            Some(request) => request(resolved),
            None => resolved.clone(),
        }
    }
}

impl Default for LoadStep {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoadStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadStep")
            .field("config", &self.config)
            .field("has_loader", &self.loader.is_some())
            .finish_non_exhaustive()
    }
}

impl Step for LoadStep {
    fn invoke_step<'a>(&'a self, input: Input) -> OutputStream<'a> {
        let Some(input) = self.config.prepare_input(input) else {
            return Box::new(std::iter::empty());
        };

        let request = self.build_request(input.value());
        let raw = Box::new(lazy(move || {
            let item = match &self.loader {
                Some(loader) => loader.load(&request),
                None => Err(FlowError::Loader(
                    "no loader registered for this step".to_string(),
                )),
            };
            Box::new(std::iter::once(item))
                as Box<dyn Iterator<Item = Result<Value, FlowError>> + 'a>
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

    fn loading_mut(&mut self) -> Option<&mut dyn LoadingStep> {
        Some(self)
    }
}

impl LoadingStep for LoadStep {
    fn add_loader(&mut self, loader: Arc<dyn Loader>) {
        self.loader = Some(loader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MockLoader;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_load_step_emits_loader_response() {
        let mut loader = MockLoader::new();
        loader
            .expect_load()
            .withf(|request| request == &json!("https://example.com"))
            .times(1)
            .returning(|_| Ok(json!({"status": 200, "body": "hello"})));

        let mut step = LoadStep::new();
        step.add_loader(Arc::new(loader));

        let outputs: Vec<Output> = step
            .invoke_step(Input::new(json!("https://example.com")))
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_else(|e| panic!("unexpected fault: {e}"));

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].value(), &json!({"status": 200, "body": "hello"}));
    }

    #[test]
    fn test_missing_loader_is_a_fault() {
        let step = LoadStep::new();
        let mut stream = step.invoke_step(Input::new(json!("x")));
        assert!(matches!(stream.next(), Some(Err(FlowError::Loader(_)))));
    }

    #[test]
    fn test_request_builder_shapes_the_request() {
        let mut loader = MockLoader::new();
        loader
            .expect_load()
            .withf(|request| request == &json!({"url": "https://example.com", "method": "GET"}))
            .returning(|_| Ok(json!("ok")));

        let mut step =
            LoadStep::new().with_request(|url| json!({"url": url, "method": "GET"}));
        step.add_loader(Arc::new(loader));

        let outputs: Vec<Output> = step
            .invoke_step(Input::new(json!("https://example.com")))
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_else(|e| panic!("unexpected fault: {e}"));
        assert_eq!(outputs[0].value(), &json!("ok"));
    }

    #[test]
    fn test_loading_capability_is_exposed() {
        let mut step = LoadStep::new();
        assert!(step.loading_mut().is_some());

        let mut plain = super::super::FnStep::passthrough();
        assert!(Step::loading_mut(&mut plain).is_none());
    }
}
