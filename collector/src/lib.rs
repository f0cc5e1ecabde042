//! IPFIX collecting process.
//!
//! This crate receives IPFIX messages from remote exporters over TCP or
//! UDP, maintains the per-observation-domain template state needed to
//! interpret data records, decodes records into typed information
//! elements, and surfaces decoded messages to one consumer through a
//! bounded in-process channel.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ipfix_collector::{CollectingProcess, CollectorConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CollectorConfig::new("tcp://0.0.0.0:4739".parse()?);
//! let process = Arc::new(CollectingProcess::new(config)?);
//! let mut messages = process.message_channel().expect("first take");
//!
//! let runner = process.clone();
//! tokio::spawn(async move { runner.start().await });
//!
//! while let Some(message) = messages.recv().await {
//!     println!(
//!         "domain {}: {} records",
//!         message.header.observation_domain_id,
//!         message.record_count()
//!     );
//! }
//! // Channel closed: the process has stopped.
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decoder;
pub mod error;
pub mod process;
pub mod session;
pub mod store;

pub use decoder::{
    decode_message, DecodeError, DecoderOptions, InformationElementWithValue, Message, Record, Set,
};
pub use error::Error;
pub use process::{BindAddress, CollectingProcess, CollectorConfig};
pub use session::Transport;
pub use store::TemplateStore;
