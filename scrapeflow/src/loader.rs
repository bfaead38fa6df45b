//! Loader collaborator seam.
//!
//! The core never fetches anything itself; leaf loading steps hand a
//! request value to a [`Loader`] and emit whatever comes back. Retry
//! policy, protocols, and response parsing all live behind this trait.

use serde_json::Value;
use std::sync::Arc;

use crate::errors::FlowError;

/// Trait for loading collaborators consumed by leaf steps.
#[cfg_attr(test, mockall::automock)]
pub trait Loader: Send + Sync {
    /// Loads a response for a request value.
    fn load(&self, request: &Value) -> Result<Value, FlowError>;
}

/// Narrow capability trait for steps that accept a loader.
///
/// Composite steps and the driver probe for this capability through
/// [`crate::steps::Step::loading_mut`] instead of inspecting signatures.
pub trait LoadingStep {
    /// Registers the loader the step should use.
    fn add_loader(&mut self, loader: Arc<dyn Loader>);
}
