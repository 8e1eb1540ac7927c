/// Dirscope Core — lazy directory exploration and on-demand size aggregation.
///
/// This crate contains the scanning engine with zero UI dependencies. A
/// consumer (see `dirscope-session`) owns a [`registry::TaskRegistry`], a
/// [`model::TreeModel`] and a [`model::ChartModel`], starts workers through
/// the registry and applies their events to the models on its own thread.
///
/// # Modules
///
/// - [`model`] — Arena tree, chart model, entry records, sorting, size formatting.
/// - [`scanner`] — Entry scanner, directory loader, size aggregator, cancellation.
/// - [`registry`] — At-most-one-task-per-target bookkeeping and ordered teardown.
/// - [`config`] — Tunables, loadable from JSON.
/// - [`error`] — Error types.
pub mod config;
pub mod error;
pub mod model;
pub mod registry;
pub mod scanner;
