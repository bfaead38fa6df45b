//! Data carriers threaded through every step call.
//!
//! An [`Input`] enters a step, an [`Output`] leaves it, and a [`Record`]
//! accumulates the extracted data of one lineage on its way to the store.

mod input;
mod output;
mod record;

pub use input::Input;
pub use output::Output;
pub use record::Record;

/// The mapping flavor of a JSON value, re-exported for collaborator APIs.
pub type ValueMap = serde_json::Map<String, serde_json::Value>;
