/// Dirscope Session — drives the engine on behalf of a host.
///
/// This crate owns no threads of its own. A host (the `dirscope` binary, or
/// a UI) calls the `request_*` methods in response to user actions and
/// [`Session::process_events`] once per frame. Engine logic lives in
/// `dirscope-core`.
pub mod state;

pub use state::Session;
