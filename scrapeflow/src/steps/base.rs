//! Shared behavior every concrete step relies on.
//!
//! `StepConfig` holds the configuration surface of the step contract
//! (selector key, result-key policy, cascade flag, uniqueness filters,
//! output filters, keep-input-data, logger, input-adjustment hook) and the
//! per-instance, run-lifetime fingerprint sets. Concrete steps embed one
//! and drive their raw values through [`StepConfig::assemble`], which
//! applies the full output protocol lazily, one value at a time.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::errors::FlowError;
use crate::io::{Input, Output, Record, ValueMap};
use crate::logging::Logger;
use crate::utils::fingerprint;

use super::filters::OutputFilter;
use super::OutputStream;

/// The key a scalar contribution lands under when no explicit key is set.
pub(crate) const UNNAMED_KEY: &str = "unnamed";

/// How a step contributes to the lineage's record.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ResultWrite {
    /// The step does not touch the record.
    None,
    /// Merge synchronously when the step runs, creating the record if this
    /// step is the first contributor in its lineage.
    Immediate(Option<String>),
    /// Stage the value on the output, to be merged into every record
    /// created downstream of it.
    Deferred(Option<String>),
}

/// Configuration and run-lifetime state shared by all concrete steps.
pub struct StepConfig {
    use_input_key: Option<String>,
    result_write: ResultWrite,
    cascades: bool,
    unique_input: bool,
    unique_output: bool,
    keep_input_data: Option<Option<String>>,
    filters: Vec<OutputFilter>,
    logger: Option<Arc<dyn Logger>>,
    input_refiner: Option<Box<dyn Fn(&Input, &Output) -> Input + Send + Sync>>,
    seen_inputs: Mutex<HashSet<String>>,
    seen_outputs: Mutex<HashSet<String>>,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            use_input_key: None,
            result_write: ResultWrite::None,
            cascades: true,
            unique_input: false,
            unique_output: false,
            keep_input_data: None,
            filters: Vec::new(),
            logger: None,
            input_refiner: None,
            seen_inputs: Mutex::new(HashSet::new()),
            seen_outputs: Mutex::new(HashSet::new()),
        }
    }
}

impl std::fmt::Debug for StepConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepConfig")
            .field("use_input_key", &self.use_input_key)
            .field("result_write", &self.result_write)
            .field("cascades", &self.cascades)
            .field("unique_input", &self.unique_input)
            .field("unique_output", &self.unique_output)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

impl StepConfig {
    /// Creates a default configuration: cascading, no record contribution,
    /// no filters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the step to one key of a mapping input value.
    pub fn set_use_input_key(&mut self, key: &str) {
        self.use_input_key = Some(key.to_string());
    }

    /// Contribute outputs to the record under an explicit key.
    pub fn set_result_key(&mut self, key: &str) {
        self.result_write = ResultWrite::Immediate(Some(key.to_string()));
    }

    /// Contribute outputs to the record; mapping outputs splice their keys
    /// directly, scalar outputs land under [`UNNAMED_KEY`].
    pub fn add_to_result(&mut self) {
        self.result_write = ResultWrite::Immediate(None);
    }

    /// Stage outputs as deferred result data instead of contributing
    /// immediately.
    pub fn add_later_to_result(&mut self, key: Option<&str>) {
        self.result_write = ResultWrite::Deferred(key.map(ToString::to_string));
    }

    /// The explicit immediate result key, if one is set.
    #[must_use]
    pub fn result_key(&self) -> Option<String> {
        match &self.result_write {
            ResultWrite::Immediate(key) => key.clone(),
            _ => None,
        }
    }

    /// Controls whether outputs cascade downstream.
    pub fn set_cascades(&mut self, cascades: bool) {
        self.cascades = cascades;
    }

    /// Whether outputs cascade downstream.
    #[must_use]
    pub fn cascades(&self) -> bool {
        self.cascades
    }

    /// Skip inputs whose resolved value was already seen by this instance
    /// during the current run.
    pub fn set_unique_input(&mut self, unique: bool) {
        self.unique_input = unique;
    }

    /// Drop output values already emitted by this instance during the
    /// current run.
    pub fn set_unique_output(&mut self, unique: bool) {
        self.unique_output = unique;
    }

    /// Whether output uniqueness filtering is enabled.
    #[must_use]
    pub fn unique_output(&self) -> bool {
        self.unique_output
    }

    /// Splice the raw input value into every output (under `key` if given).
    pub fn set_keep_input_data(&mut self, key: Option<&str>) {
        self.keep_input_data = Some(key.map(ToString::to_string));
    }

    /// Whether input data is merged into outputs.
    #[must_use]
    pub fn keeps_input_data(&self) -> bool {
        self.keep_input_data.is_some()
    }

    /// Adds an output filter.
    pub fn add_filter(&mut self, filter: OutputFilter) {
        self.filters.push(filter);
    }

    /// Attaches a logger.
    pub fn set_logger(&mut self, logger: Arc<dyn Logger>) {
        self.logger = Some(logger);
    }

    /// The attached logger, if any.
    #[must_use]
    pub fn logger(&self) -> Option<&Arc<dyn Logger>> {
        self.logger.as_ref()
    }

    /// Sets the input-adjustment hook used inside groups.
    pub fn set_input_refiner(
        &mut self,
        refiner: impl Fn(&Input, &Output) -> Input + Send + Sync + 'static,
    ) {
        self.input_refiner = Some(Box::new(refiner));
    }

    /// Applies the input-adjustment hook, or passes the input through.
    #[must_use]
    pub fn refine_input(&self, input: Input, output: &Output) -> Input {
        match &self.input_refiner {
            Some(refiner) => refiner(&input, output),
            None => input,
        }
    }

    /// Whether this configuration writes to a record when the step runs.
    #[must_use]
    pub fn adds_to_or_creates_record(&self) -> bool {
        matches!(self.result_write, ResultWrite::Immediate(_))
    }

    /// Clears the run-lifetime fingerprint sets.
    pub fn reset_run_state(&self) {
        self.seen_inputs.lock().clear();
        self.seen_outputs.lock().clear();
    }

    /// Resolves the selector key and applies the unique-input guard.
    ///
    /// Returns `None` when the resolved value was already seen (a silent
    /// skip, not an error).
    #[must_use]
    pub fn prepare_input(&self, input: Input) -> Option<Input> {
        let input = self.resolve_selector(input);

        if self.unique_input && !mark_seen(&self.seen_inputs, input.value()) {
            self.log_debug("skipping input, not unique for this step");
            return None;
        }

        Some(input)
    }

    fn resolve_selector(&self, input: Input) -> Input {
        let Some(key) = &self.use_input_key else {
            return input;
        };

        match input.value() {
            Value::Object(map) => {
                let resolved = map.get(key).cloned().unwrap_or_else(|| {
                    self.log_warn(&format!("input mapping has no key '{key}'"));
                    Value::Null
                });
                input.replace_value(resolved)
            }
            _ => {
                self.log_warn(&format!(
                    "can't select key '{key}' from a non-mapping input, using the whole value"
                ));
                input
            }
        }
    }

    /// Returns true if the value passes all configured output filters.
    #[must_use]
    pub fn passes_filters(&self, value: &Value) -> bool {
        self.filters.iter().all(|filter| filter.passes(value))
    }

    /// Registers an output value fingerprint; returns false for a
    /// duplicate.
    #[must_use]
    pub fn mark_output_seen(&self, value: &Value) -> bool {
        mark_seen(&self.seen_outputs, value)
    }

    /// Merges the raw input value into an output value.
    ///
    /// With a key, the input value lands under that key; without one, the
    /// input must be a mapping and its keys are spliced in. Existing
    /// output entries win over merged input entries.
    pub fn merge_input_data(&self, input_value: &Value, data: Value) -> Result<Value, FlowError> {
        let Some(key) = &self.keep_input_data else {
            return Ok(data);
        };

        let mut map = match data {
            Value::Object(map) => map,
            other => {
                let mut map = ValueMap::new();
                map.insert("output".to_string(), other);
                map
            }
        };

        match (key, input_value) {
            (Some(key), value) => {
                map.entry(key.clone()).or_insert_with(|| value.clone());
            }
            (None, Value::Object(input_map)) => {
                for (k, v) in input_map {
                    map.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            (None, _) => {
                return Err(FlowError::step(
                    "can't keep input data: input value is not a mapping and no key was given",
                ));
            }
        }

        Ok(Value::Object(map))
    }

    /// Writes an output value into a record according to the immediate
    /// result policy. No-op for non-contributing configurations.
    pub fn commit_to_record(&self, value: &Value, record: &Record) {
        match &self.result_write {
            ResultWrite::Immediate(Some(key)) => record.set(key, value.clone()),
            ResultWrite::Immediate(None) => match value {
                Value::Object(map) => record.splice(map),
                other => record.set(UNNAMED_KEY, other.clone()),
            },
            _ => {}
        }
    }

    /// Builds the final output for one produced value.
    ///
    /// An immediate contributor reuses the input's record or creates a
    /// fresh one per output (merging the input's deferred data into it,
    /// exactly once per record). A deferred contributor stages the value
    /// on the output instead.
    #[must_use]
    pub fn make_output(&self, value: Value, input: &Input) -> Output {
        match &self.result_write {
            ResultWrite::None => {
                Output::assembled(value, input.record().cloned(), input.deferred().clone())
            }
            ResultWrite::Deferred(key) => {
                let mut deferred = input.deferred().clone();
                stage_deferred(&mut deferred, key.as_deref(), &value);
                Output::assembled(value, input.record().cloned(), deferred)
            }
            ResultWrite::Immediate(_) => {
                let record = input
                    .record()
                    .cloned()
                    .unwrap_or_else(|| Record::from_map(input.deferred()));
                self.commit_to_record(&value, &record);
                Output::assembled(value, Some(record), input.deferred().clone())
            }
        }
    }

    /// Runs a raw value sequence through the shared output protocol:
    /// filters, input-data merge, output uniqueness, record contribution.
    #[must_use]
    pub fn assemble<'a>(
        &'a self,
        input: Input,
        raw: Box<dyn Iterator<Item = Result<Value, FlowError>> + 'a>,
    ) -> OutputStream<'a> {
        Box::new(OutputAssembly {
            config: self,
            input,
            raw,
            done: false,
        })
    }

    pub(crate) fn log_debug(&self, message: &str) {
        if let Some(logger) = &self.logger {
            logger.debug(message);
        }
    }

    pub(crate) fn log_warn(&self, message: &str) {
        if let Some(logger) = &self.logger {
            logger.warn(message);
        }
    }
}

fn mark_seen(seen: &Mutex<HashSet<String>>, value: &Value) -> bool {
    seen.lock().insert(fingerprint(value))
}

fn stage_deferred(deferred: &mut ValueMap, key: Option<&str>, value: &Value) {
    match key {
        Some(key) => {
            deferred.insert(key.to_string(), value.clone());
        }
        None => match value {
            Value::Object(map) => {
                for (k, v) in map {
                    deferred.insert(k.clone(), v.clone());
                }
            }
            other => {
                deferred.insert(UNNAMED_KEY.to_string(), other.clone());
            }
        },
    }
}

/// The lazy per-value assembly pipeline shared by all concrete steps.
struct OutputAssembly<'a> {
    config: &'a StepConfig,
    input: Input,
    raw: Box<dyn Iterator<Item = Result<Value, FlowError>> + 'a>,
    done: bool,
}

impl Iterator for OutputAssembly<'_> {
    type Item = Result<Output, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let value = match self.raw.next()? {
                Ok(value) => value,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if !self.config.passes_filters(&value) {
                continue;
            }

            let value = match self.config.merge_input_data(self.input.value(), value) {
                Ok(value) => value,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if self.config.unique_output() && !self.config.mark_output_seen(&value) {
                continue;
            }

            return Some(Ok(self.config.make_output(value, &self.input)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn assemble_values(config: &StepConfig, input: Input, values: Vec<Value>) -> Vec<Output> {
        config
            .assemble(input, Box::new(values.into_iter().map(Ok)))
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_else(|e| panic!("unexpected fault: {e}"))
    }

    #[test]
    fn test_selector_key_resolution() {
        let mut config = StepConfig::new();
        config.set_use_input_key("url");

        let input = config
            .prepare_input(Input::new(json!({"url": "https://example.com", "title": "x"})))
            .unwrap_or_else(|| panic!("input must pass"));
        assert_eq!(input.value(), &json!("https://example.com"));
    }

    #[test]
    fn test_selector_key_missing_resolves_to_null() {
        let mut config = StepConfig::new();
        config.set_use_input_key("absent");

        let input = config
            .prepare_input(Input::new(json!({"url": "x"})))
            .unwrap_or_else(|| panic!("input must pass"));
        assert_eq!(input.value(), &Value::Null);
    }

    #[test]
    fn test_unique_input_guard_is_silent() {
        let mut config = StepConfig::new();
        config.set_unique_input(true);

        assert!(config.prepare_input(Input::new(json!("a"))).is_some());
        assert!(config.prepare_input(Input::new(json!("a"))).is_none());
        assert!(config.prepare_input(Input::new(json!("b"))).is_some());

        config.reset_run_state();
        assert!(config.prepare_input(Input::new(json!("a"))).is_some());
    }

    #[test]
    fn test_unique_output_drops_duplicates_in_first_seen_order() {
        let mut config = StepConfig::new();
        config.set_unique_output(true);

        let values = ["one", "two", "three", "one", "three", "four", "one", "five", "two"]
            .iter()
            .map(|s| json!(s))
            .collect();
        let outputs = assemble_values(&config, Input::new(json!("seed")), values);

        let emitted: Vec<&Value> = outputs.iter().map(Output::value).collect();
        assert_eq!(
            emitted,
            vec![
                &json!("one"),
                &json!("two"),
                &json!("three"),
                &json!("four"),
                &json!("five")
            ]
        );
    }

    #[test]
    fn test_immediate_contribution_creates_record_per_output() {
        let mut config = StepConfig::new();
        config.set_result_key("number");

        let outputs = assemble_values(
            &config,
            Input::new(json!("seed")),
            vec![json!("one"), json!("two")],
        );

        assert_eq!(outputs.len(), 2);
        let first = outputs[0].record().unwrap_or_else(|| panic!("record"));
        let second = outputs[1].record().unwrap_or_else(|| panic!("record"));
        assert!(!first.same_record(second));
        assert_eq!(first.to_value(), json!({"number": "one"}));
        assert_eq!(second.to_value(), json!({"number": "two"}));
    }

    #[test]
    fn test_immediate_contribution_reuses_existing_record() {
        let mut config = StepConfig::new();
        config.set_result_key("number");

        let record = Record::new();
        let outputs = assemble_values(
            &config,
            Input::with_record(json!("seed"), record.clone()),
            vec![json!("one"), json!("two"), json!("three")],
        );

        assert_eq!(outputs.len(), 3);
        assert_eq!(record.to_value(), json!({"number": ["one", "two", "three"]}));
    }

    #[test]
    fn test_keyless_contribution_splices_mappings() {
        let mut config = StepConfig::new();
        config.add_to_result();

        let outputs = assemble_values(
            &config,
            Input::new(json!("seed")),
            vec![json!({"a": 1, "b": 2})],
        );
        let record = outputs[0].record().unwrap_or_else(|| panic!("record"));
        assert_eq!(record.to_value(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_deferred_contribution_stages_without_record() {
        let mut config = StepConfig::new();
        config.add_later_to_result(None);

        let outputs = assemble_values(
            &config,
            Input::new(json!("seed")),
            vec![json!({"some": "thing"})],
        );

        assert!(outputs[0].record().is_none());
        assert_eq!(outputs[0].deferred().get("some"), Some(&json!("thing")));
    }

    #[test]
    fn test_deferred_data_merges_into_created_record() {
        let mut deferred_config = StepConfig::new();
        deferred_config.add_later_to_result(None);
        let staged = assemble_values(
            &deferred_config,
            Input::new(json!("seed")),
            vec![json!({"some": "thing"})],
        );

        let mut contributing = StepConfig::new();
        contributing.set_result_key("number");
        let input = Input::from_output(&staged[0]);
        let outputs = assemble_values(&contributing, input, vec![json!("one")]);

        let record = outputs[0].record().unwrap_or_else(|| panic!("record"));
        assert_eq!(record.to_value(), json!({"some": "thing", "number": "one"}));
    }

    #[test]
    fn test_filters_reject_silently() {
        let mut config = StepConfig::new();
        config.add_filter(OutputFilter::predicate(|v| v.as_i64().is_some_and(|n| n % 2 == 0)));

        let outputs = assemble_values(
            &config,
            Input::new(json!(0)),
            vec![json!(1), json!(2), json!(3), json!(4)],
        );
        let emitted: Vec<&Value> = outputs.iter().map(Output::value).collect();
        assert_eq!(emitted, vec![&json!(2), &json!(4)]);
    }

    #[test]
    fn test_keep_input_data_without_key_requires_mapping() {
        let mut config = StepConfig::new();
        config.set_keep_input_data(None);

        let mut stream = config.assemble(
            Input::new(json!("scalar input")),
            Box::new(std::iter::once(Ok(json!({"out": 1})))),
        );
        assert!(matches!(
            stream.next(),
            Some(Err(FlowError::StepExecution(_)))
        ));
    }

    #[test]
    fn test_keep_input_data_merges_without_overwriting() {
        let mut config = StepConfig::new();
        config.set_keep_input_data(None);

        let outputs = assemble_values(
            &config,
            Input::new(json!({"kept": true, "out": "input wins not"})),
            vec![json!({"out": 1})],
        );
        assert_eq!(outputs[0].value(), &json!({"out": 1, "kept": true}));
    }

    #[test]
    fn test_fault_terminates_the_sequence() {
        let config = StepConfig::new();
        let raw: Vec<Result<Value, FlowError>> = vec![
            Ok(json!(1)),
            Err(FlowError::step("broken transform")),
            Ok(json!(2)),
        ];
        let mut stream = config.assemble(Input::new(json!(0)), Box::new(raw.into_iter()));

        assert!(matches!(stream.next(), Some(Ok(_))));
        assert!(matches!(stream.next(), Some(Err(_))));
        assert!(stream.next().is_none());
    }
}
