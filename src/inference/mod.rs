//! Configuration inference and merging
//!
//! The [`ConfigurationInferenceOrchestrator`] turns a message corpus into a
//! [`VendorConfiguration`](crate::models::VendorConfiguration) by sequencing
//! vendor detection, field analysis, deviation detection and confidence
//! scoring. Each stage degrades to a neutral default on failure except
//! field analysis, which the configuration cannot exist without.
//!
//! The [`PatternMergeService`] combines statistics from independently
//! analyzed corpora.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pidgeon_intelligence::{
//!     CancellationToken, ConfigurationAddress, ConfigurationInferenceOrchestrator,
//!     InferenceOptions, PluginRegistry, plugins::Hl7v2Plugin,
//! };
//!
//! let registry = Arc::new(PluginRegistry::new().with_plugin(Arc::new(Hl7v2Plugin::new())));
//! let orchestrator = ConfigurationInferenceOrchestrator::new(registry);
//! let address = ConfigurationAddress::new("HL7v23", "Epic", "ADT^A01");
//!
//! let config = orchestrator
//!     .infer(&messages, &address, &InferenceOptions::default(), &CancellationToken::new())
//!     .await?;
//! println!("{}", serde_json::to_string_pretty(&config)?);
//! ```

mod merge;
mod orchestrator;

pub use merge::PatternMergeService;
pub use orchestrator::ConfigurationInferenceOrchestrator;
