//! View abstraction consumed by the presenter
//!
//! The presenter renders through this capability trait only; it never touches
//! a concrete widget toolkit. The shipped console frontend and the recording
//! fakes used in tests are the two implementations.

use crate::types::{ChatRole, Machine, MachineEvent, Measurement};

/// Rendering capabilities the presenter needs from a frontend.
///
/// All methods take `&self`; implementations use interior mutability where
/// they need state. Calls arrive on the application's single event loop.
pub trait MainView {
    /// Surface an error message to the user.
    fn show_error(&self, message: &str);

    /// Surface a transient informational notice.
    fn show_info(&self, message: &str);

    /// Reflect whether the backend is currently considered reachable.
    fn set_connection_status(&self, connected: bool);

    /// Append one entry to the chat transcript.
    fn append_chat_message(&self, role: ChatRole, content: &str);

    /// Replace the machine list.
    fn update_machine_list(&self, machines: &[Machine]);

    /// Replace the charted measurement series.
    fn update_chart(&self, measurements: &[Measurement]);

    /// Replace the events table.
    fn update_events_table(&self, events: &[MachineEvent]);

    /// Show the outcome of an analysis run.
    fn set_analysis_result(&self, summary: &str, anomaly_count: i64);
}
