//! # LOS Core
//!
//! Broker result lifecycle and synchronization pipeline for the LOS
//! (length-of-stay) report: discover the latest tagged request on the data
//! broker, download its aggregated results, run the external statistical
//! computation over a rolling ISO-calendar-week window, package the result
//! under its canonical name, and publish it to the remote endpoint with
//! full-replace semantics.
//!
//! The crate is organized into one module per pipeline component:
//!
//! - [`window`]: reporting-window arithmetic on ISO calendar weeks
//! - [`broker`]: HTTP client for the data broker (discovery, export,
//!   download, completion ratios)
//! - [`compute`]: invocation of the external statistical computation
//! - [`package`]: canonical renaming, optional archiving, cleanup
//! - [`remote`]: remote file store (SFTP, optional upload encryption) and
//!   the full-replace publish strategy
//! - [`status`]: persisted completion-state reconciliation
//! - [`pipeline`]: the orchestrator sequencing one end-to-end run
//!
//! Components are independently invocable behind trait seams
//! ([`broker::BrokerApi`], [`compute::ResultComputation`],
//! [`remote::RemoteFileStore`]); only the orchestrator calls them in
//! pipeline order.

pub mod broker;
pub mod compute;
pub mod error;
pub mod package;
pub mod pipeline;
pub mod remote;
pub mod status;
pub mod window;

pub use error::{PipelineError, Result};
pub use pipeline::{Outcome, Pipeline, PipelineSettings};
pub use window::ReportingWindow;
