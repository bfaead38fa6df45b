//! Parallel step composition with output merging.

use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

use crate::errors::FlowError;
use crate::io::{Input, Output, Record, ValueMap};
use crate::loader::{Loader, LoadingStep};
use crate::logging::Logger;
use crate::utils::lazy;

use super::{OutputFilter, OutputStream, Step, StepConfig};

/// A composite step that runs all of its children against the same
/// resolved input and merges their independent output streams into
/// combined records.
///
/// Children run strictly in registration order. Outputs are merged by
/// emission position: the n-th output of every cascading child lands in
/// the n-th combined record, keyed by the child's result key, its
/// registration name, or its registration index.
pub struct Group {
    config: StepConfig,
    children: Vec<Child>,
    loader: Option<Arc<dyn Loader>>,
}

struct Child {
    name: Option<String>,
    step: Box<dyn Step>,
}

/// One combined record under construction: every slot is append-only, so
/// a child emitting more than once per position never overwrites a
/// sibling's data.
type Bucket = IndexMap<String, Accum>;

enum Accum {
    Values(Vec<Value>),
    Nested(IndexMap<String, Vec<Value>>),
}

impl Accum {
    fn push_scalar(&mut self, value: Value) {
        match self {
            Self::Values(items) => items.push(value),
            Self::Nested(map) => {
                // A child switched from mapping to scalar output at the
                // same position; fold what we have into the flat list.
                let folded = nested_to_value(std::mem::take(map));
                *self = Self::Values(vec![folded, value]);
            }
        }
    }

    fn push_entry(&mut self, key: &str, value: Value) {
        match self {
            Self::Nested(map) => map.entry(key.to_string()).or_default().push(value),
            Self::Values(items) => {
                let mut map = ValueMap::new();
                map.insert(key.to_string(), value);
                items.push(Value::Object(map));
            }
        }
    }
}

enum ChildKey {
    Named(String),
    Index(usize),
}

impl Group {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: StepConfig::new(),
            children: Vec::new(),
            loader: None,
        }
    }

    /// Registers a child step under the next free index.
    #[must_use]
    pub fn add_step(mut self, step: impl Step + 'static) -> Self {
        self.register(None, Box::new(step));
        self
    }

    /// Registers a child step under a name.
    ///
    /// # Errors
    ///
    /// Fails with [`FlowError::InvalidStep`] for an empty or already-taken
    /// name; the step is not registered.
    pub fn add_keyed_step(mut self, name: &str, step: impl Step + 'static) -> Result<Self, FlowError> {
        if name.is_empty() {
            return Err(FlowError::InvalidStep(
                "step name must not be empty".to_string(),
            ));
        }
        if self
            .children
            .iter()
            .any(|child| child.name.as_deref() == Some(name))
        {
            return Err(FlowError::InvalidStep(format!(
                "a step named '{name}' is already registered in this group"
            )));
        }

        self.register(Some(name.to_string()), Box::new(step));
        Ok(self)
    }

    fn register(&mut self, name: Option<String>, mut step: Box<dyn Step>) {
        // Collaborators are fanned out exactly once, at registration.
        if let Some(logger) = self.config.logger() {
            step.add_logger(Arc::clone(logger));
        }
        if let Some(loader) = &self.loader {
            if let Some(loading) = step.loading_mut() {
                loading.add_loader(Arc::clone(loader));
            }
        }

        self.children.push(Child { name, step });
    }

    /// Restricts the group to one key of a mapping input value.
    #[must_use]
    pub fn use_input_key(mut self, key: &str) -> Self {
        self.config.set_use_input_key(key);
        self
    }

    /// Contribute combined records to the lineage's record, optionally
    /// under an explicit key.
    #[must_use]
    pub fn add_to_result(mut self, key: Option<&str>) -> Self {
        match key {
            Some(key) => self.config.set_result_key(key),
            None => self.config.add_to_result(),
        }
        self
    }

    /// Stage combined records as deferred result data.
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

    /// Drop duplicate combined records for the lifetime of a run.
    #[must_use]
    pub fn unique_outputs(mut self) -> Self {
        self.config.set_unique_output(true);
        self
    }

    /// Run children for side effects only; the group emits nothing.
    #[must_use]
    pub fn dont_cascade(mut self) -> Self {
        self.config.set_cascades(false);
        self
    }

    /// Splice the group's raw input value into every combined record.
    #[must_use]
    pub fn keep_input_data(mut self, key: Option<&str>) -> Self {
        self.config.set_keep_input_data(key);
        self
    }

    /// Adds an output filter applied to combined records.
    #[must_use]
    pub fn filter(mut self, filter: OutputFilter) -> Self {
        self.config.add_filter(filter);
        self
    }

    fn effective_child_key(&self, index: usize, child: &Child) -> ChildKey {
        child
            .step
            .result_key()
            .or_else(|| child.name.clone())
            .map_or(ChildKey::Index(index), ChildKey::Named)
    }

    fn execute<'a>(&'a self, input: Input) -> OutputStream<'a> {
        let Some(input) = self.config.prepare_input(input) else {
            return Box::new(std::iter::empty());
        };

        // One record up front, shared by everything this call emits;
        // otherwise each combined record would spawn its own.
        let input = if self.adds_to_or_creates_record() && input.record().is_none() {
            let record = Record::from_map(input.deferred());
            input.attach_record(record)
        } else {
            input
        };

        let mut buckets: Vec<Bucket> = Vec::new();
        let mut current_input = input.clone();

        for (index, child) in self.children.iter().enumerate() {
            let child_key = self.effective_child_key(index, child);
            let merge = self.config.cascades() && child.step.cascades();

            for (nth, item) in child.step.invoke_step(current_input.clone()).enumerate() {
                let output = match item {
                    Ok(output) => output,
                    Err(e) => return Box::new(std::iter::once(Err(e))),
                };

                // Left-to-right propagation: refinements only affect the
                // children that have not run yet.
                current_input = child.step.refine_input(current_input, &output);

                if merge {
                    accumulate(&mut buckets, nth, &child_key, output.value());
                }
            }
        }

        if !self.config.cascades() {
            return Box::new(std::iter::empty());
        }

        let input_value = input.value().clone();
        Box::new(buckets.into_iter().filter_map(move |bucket| {
            let data = normalize_bucket(bucket);

            if !self.config.passes_filters(&data) {
                return None;
            }
            let data = match self.config.merge_input_data(&input_value, data) {
                Ok(data) => data,
                Err(e) => return Some(Err(e)),
            };
            if self.config.unique_output() && !self.config.mark_output_seen(&data) {
                return None;
            }

            Some(Ok(self.config.make_output(data, &input)))
        }))
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("config", &self.config)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

impl Step for Group {
    fn invoke_step<'a>(&'a self, input: Input) -> OutputStream<'a> {
        Box::new(lazy(move || self.execute(input)))
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
            || self
                .children
                .iter()
                .any(|child| child.step.adds_to_or_creates_record())
    }

    fn add_logger(&mut self, logger: Arc<dyn Logger>) {
        self.config.set_logger(Arc::clone(&logger));
        for child in &mut self.children {
            child.step.add_logger(Arc::clone(&logger));
        }
    }

    fn reset_run_state(&self) {
        self.config.reset_run_state();
        for child in &self.children {
            child.step.reset_run_state();
        }
    }

    fn refine_input(&self, input: Input, output: &Output) -> Input {
        self.config.refine_input(input, output)
    }

    fn loading_mut(&mut self) -> Option<&mut dyn LoadingStep> {
        Some(self)
    }
}

impl LoadingStep for Group {
    fn add_loader(&mut self, loader: Arc<dyn Loader>) {
        for child in &mut self.children {
            if let Some(loading) = child.step.loading_mut() {
                loading.add_loader(Arc::clone(&loader));
            }
        }
        self.loader = Some(loader);
    }
}

fn accumulate(buckets: &mut Vec<Bucket>, nth: usize, child_key: &ChildKey, value: &Value) {
    while buckets.len() <= nth {
        buckets.push(Bucket::new());
    }
    let bucket = &mut buckets[nth];

    match (value, child_key) {
        // Unnamed child with a mapping output: splice its keys into the
        // combined record directly.
        (Value::Object(map), ChildKey::Index(_)) => {
            for (key, entry) in map {
                bucket
                    .entry(key.clone())
                    .or_insert_with(|| Accum::Values(Vec::new()))
                    .push_scalar(entry.clone());
            }
        }
        // Named child with a mapping output: nest the mapping under the
        // child's key.
        (Value::Object(map), ChildKey::Named(name)) => {
            for (key, entry) in map {
                bucket
                    .entry(name.clone())
                    .or_insert_with(|| Accum::Nested(IndexMap::new()))
                    .push_entry(key, entry.clone());
            }
        }
        (scalar, child_key) => {
            let key = match child_key {
                ChildKey::Named(name) => name.clone(),
                ChildKey::Index(index) => index.to_string(),
            };
            bucket
                .entry(key)
                .or_insert_with(|| Accum::Values(Vec::new()))
                .push_scalar(scalar.clone());
        }
    }
}

/// Collapses the append-only bookkeeping: every single-element
/// accumulation slot becomes its bare value.
fn normalize_bucket(bucket: Bucket) -> Value {
    let mut data = ValueMap::new();
    for (key, accum) in bucket {
        let value = match accum {
            Accum::Values(items) => collapse(items),
            Accum::Nested(map) => nested_to_value(map),
        };
        data.insert(key, value);
    }
    Value::Object(data)
}

fn nested_to_value(map: IndexMap<String, Vec<Value>>) -> Value {
    let mut data = ValueMap::new();
    for (key, items) in map {
        data.insert(key, collapse(items));
    }
    Value::Object(data)
}

fn collapse(mut items: Vec<Value>) -> Value {
    if items.len() == 1 {
        items.remove(0)
    } else {
        Value::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::FnStep;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn collect(group: &Group, input: Input) -> Vec<Output> {
        group
            .invoke_step(input)
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_else(|e| panic!("unexpected fault: {e}"))
    }

    #[test]
    fn test_siblings_merge_under_keys_and_indexes() {
        let group = Group::new()
            .add_step(FnStep::value(json!("alpha")).add_to_result(Some("a")))
            .add_step(FnStep::value(json!("beta")));

        let outputs = collect(&group, Input::new(json!("seed")));
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].value(), &json!({"a": "alpha", "1": "beta"}));
    }

    #[test]
    fn test_named_registration_keys_the_merge() {
        let group = Group::new()
            .add_keyed_step("first", FnStep::value(json!(1)))
            .and_then(|g| g.add_keyed_step("second", FnStep::value(json!(2))))
            .unwrap_or_else(|e| panic!("registration failed: {e}"));

        let outputs = collect(&group, Input::new(json!("seed")));
        assert_eq!(outputs[0].value(), &json!({"first": 1, "second": 2}));
    }

    #[test]
    fn test_empty_or_duplicate_names_fail_fast() {
        assert!(matches!(
            Group::new().add_keyed_step("", FnStep::passthrough()),
            Err(FlowError::InvalidStep(_))
        ));

        let group = Group::new()
            .add_keyed_step("dup", FnStep::passthrough())
            .unwrap_or_else(|e| panic!("registration failed: {e}"));
        assert!(matches!(
            group.add_keyed_step("dup", FnStep::passthrough()),
            Err(FlowError::InvalidStep(_))
        ));
    }

    #[test]
    fn test_mapping_outputs_splice_and_nest() {
        let group = Group::new()
            .add_step(FnStep::value(json!({"x": 1, "y": 2})))
            .add_step(FnStep::value(json!({"inner": true})).add_to_result(Some("named")));

        let outputs = collect(&group, Input::new(json!("seed")));
        assert_eq!(
            outputs[0].value(),
            &json!({"x": 1, "y": 2, "named": {"inner": true}})
        );
    }

    #[test]
    fn test_multiple_positions_make_multiple_records() {
        let group = Group::new()
            .add_step(
                FnStep::new(|_| Ok(vec![json!("a1"), json!("a2")])).add_to_result(Some("a")),
            )
            .add_step(
                FnStep::new(|_| Ok(vec![json!("b1"), json!("b2")])).add_to_result(Some("b")),
            );

        let outputs = collect(&group, Input::new(json!("seed")));
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].value(), &json!({"a": "a1", "b": "b1"}));
        assert_eq!(outputs[1].value(), &json!({"a": "a2", "b": "b2"}));
    }

    #[test]
    fn test_shared_record_across_combined_outputs() {
        let group = Group::new()
            .add_step(FnStep::new(|_| Ok(vec![json!("x"), json!("y")])).add_to_result(Some("v")));

        let outputs = collect(&group, Input::new(json!("seed")));
        assert_eq!(outputs.len(), 2);
        let first = outputs[0].record().unwrap_or_else(|| panic!("record"));
        let second = outputs[1].record().unwrap_or_else(|| panic!("record"));
        assert!(first.same_record(second));
    }

    #[test]
    fn test_non_cascading_child_is_excluded_from_merge() {
        let group = Group::new()
            .add_step(FnStep::value(json!("visible")).add_to_result(Some("seen")))
            .add_step(FnStep::value(json!("side effect only")).dont_cascade());

        let outputs = collect(&group, Input::new(json!("seed")));
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].value(), &json!({"seen": "visible"}));
    }

    #[test]
    fn test_refine_input_affects_later_children_only() {
        let group = Group::new()
            .add_step(
                FnStep::passthrough().update_input_using_output(|_, output| {
                    Input::new(json!(format!("refined by {}", output.value())))
                }),
            )
            .add_step(FnStep::passthrough().add_to_result(Some("second")));

        let outputs = collect(&group, Input::new(json!("seed")));
        assert_eq!(
            outputs[0].value(),
            &json!({"0": "seed", "second": "refined by \"seed\""})
        );
    }

    #[test]
    fn test_keep_input_data_splices_raw_input() {
        let group = Group::new()
            .add_step(FnStep::value(json!("out")).add_to_result(Some("o")))
            .keep_input_data(Some("seed"));

        let outputs = collect(&group, Input::new(json!("the seed")));
        assert_eq!(outputs[0].value(), &json!({"o": "out", "seed": "the seed"}));
    }

    #[test]
    fn test_unique_input_guard_aborts_silently() {
        let group = Group::new()
            .add_step(FnStep::value(json!(1)).add_to_result(Some("n")))
            .unique_inputs();

        assert_eq!(collect(&group, Input::new(json!("same"))).len(), 1);
        assert_eq!(collect(&group, Input::new(json!("same"))).len(), 0);
    }

    #[test]
    fn test_child_fault_propagates() {
        let group = Group::new()
            .add_step(FnStep::new(|_| Err(FlowError::step("child broke"))));

        let mut stream = group.invoke_step(Input::new(json!("seed")));
        assert!(matches!(stream.next(), Some(Err(FlowError::StepExecution(_)))));
    }

    #[test]
    fn test_children_run_lazily_on_first_pull() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_step = Arc::clone(&calls);

        let group = Group::new().add_step(FnStep::new(move |_| {
            calls_in_step.fetch_add(1, Ordering::SeqCst);
            Ok(vec![json!(1)])
        }));

        let mut stream = group.invoke_step(Input::new(json!("seed")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let _ = stream.next();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
