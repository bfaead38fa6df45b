//! # Scrapeflow
//!
//! A lazy, composable data-extraction pipeline framework.
//!
//! Scrapeflow chains small extraction steps into pipelines that pull data
//! through on demand:
//!
//! - **Step-based composition**: each step turns one input into a lazy
//!   sequence of outputs; steps nest into groups and loops
//! - **Record assembly**: steps opt in to contributing their outputs to a
//!   shared per-lineage record, immediately or deferred
//! - **Pluggable collaborators**: loaders fetch external resources,
//!   stores persist finished records, loggers observe everything
//! - **Run-scoped uniqueness**: steps can skip duplicate inputs or
//!   outputs for the lifetime of a run
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scrapeflow::prelude::*;
//! use serde_json::json;
//!
//! let mut crawler = Crawler::new();
//! crawler
//!     .input(json!("https://example.com/products"))
//!     .add_step(LoadStep::new())
//!     .add_keyed_step("title", FnStep::new(extract_titles))?
//!     .set_loader(my_loader)
//!     .set_store(JsonLinesStore::create("products.jsonl")?);
//!
//! for record in crawler.run() {
//!     println!("{:?}", record?);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod crawler;
pub mod errors;
pub mod io;
pub mod loader;
pub mod logging;
pub mod steps;
pub mod store;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crawler::Crawler;
    pub use crate::errors::FlowError;
    pub use crate::io::{Input, Output, Record, ValueMap};
    pub use crate::loader::{Loader, LoadingStep};
    pub use crate::logging::{CollectingLogger, Logger, TracingLogger};
    pub use crate::steps::{
        Feedback, FnStep, Group, LoadStep, LoopStep, OutputFilter, Step,
    };
    pub use crate::store::{CollectingStore, JsonLinesStore, Store};
}
