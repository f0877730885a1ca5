//! In-memory cache of backend data
//!
//! The [`DataModel`] is the single holder of fetched state. Writers hand it
//! response batches; it applies the cache invariants (merge by id, newest
//! first, bounded size) and notifies subscribers about what changed. Reads
//! return clones, so no borrow is ever held across an await point by callers.
//!
//! The model is deliberately tolerant of out-of-order and duplicate delivery:
//! concurrent requests may land in any order, and the last write for a given
//! id wins.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::types::{AnalysisResult, ChatMessage, EventLevel, HealthStatus, Machine, MachineEvent, Measurement};

/// Per-machine measurement cache bound.
const MAX_MEASUREMENTS_PER_MACHINE: usize = 1000;
/// Global event cache bound.
const MAX_EVENTS: usize = 500;
/// Chat history bound (FIFO).
const MAX_CHAT_HISTORY: usize = 100;

/// A change notification, scoped to what changed.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    MachinesUpdated,
    MeasurementsUpdated(i64),
    EventsUpdated,
    ChatMessageAdded(ChatMessage),
    ChatHistoryCleared,
    AnalysisResultUpdated,
    HealthStatusUpdated,
    SelectedMachineChanged(Option<i64>),
}

/// In-memory cache of machines, telemetry, events, chat, and session state.
///
/// Single-loop only: shared via `Rc`, interior mutability via `RefCell`.
/// Every mutation is fully applied before its notification is emitted.
#[derive(Default)]
pub struct DataModel {
    machines: RefCell<Vec<Machine>>,
    measurements_by_machine: RefCell<HashMap<i64, Vec<Measurement>>>,
    events: RefCell<Vec<MachineEvent>>,
    chat_history: RefCell<VecDeque<ChatMessage>>,
    latest_analysis: RefCell<Option<AnalysisResult>>,
    health_status: RefCell<Option<HealthStatus>>,
    selected_machine: Cell<Option<i64>>,
    subscribers: RefCell<Vec<UnboundedSender<ModelEvent>>>,
}

impl DataModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> UnboundedReceiver<ModelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    fn emit(&self, event: ModelEvent) {
        self.subscribers
            .borrow_mut()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ==================== Machines ====================

    /// Replace the cached machine list.
    pub fn set_machines(&self, machines: Vec<Machine>) {
        *self.machines.borrow_mut() = machines;
        self.emit(ModelEvent::MachinesUpdated);
    }

    pub fn machines(&self) -> Vec<Machine> {
        self.machines.borrow().clone()
    }

    pub fn machine(&self, id: i64) -> Option<Machine> {
        self.machines.borrow().iter().find(|m| m.id == id).cloned()
    }

    // ==================== Measurements ====================

    /// Merge a batch of measurements into a machine's bucket.
    ///
    /// An incoming id that already exists overwrites the cached entry; new ids
    /// are appended. The bucket is then re-sorted newest first and truncated
    /// to the most recent [`MAX_MEASUREMENTS_PER_MACHINE`].
    pub fn add_measurements(&self, machine_id: i64, measurements: Vec<Measurement>) {
        {
            let mut by_machine = self.measurements_by_machine.borrow_mut();
            let bucket = by_machine.entry(machine_id).or_default();
            merge_newest_first(
                bucket,
                measurements,
                |m| m.id,
                |m| m.timestamp,
                MAX_MEASUREMENTS_PER_MACHINE,
            );
        }
        self.emit(ModelEvent::MeasurementsUpdated(machine_id));
    }

    /// Measurements for a machine, optionally filtered by sensor type.
    /// Newest first.
    pub fn measurements(&self, machine_id: i64, sensor_type: Option<&str>) -> Vec<Measurement> {
        let by_machine = self.measurements_by_machine.borrow();
        let Some(bucket) = by_machine.get(&machine_id) else {
            return Vec::new();
        };
        match sensor_type {
            None => bucket.clone(),
            Some(sensor) => bucket
                .iter()
                .filter(|m| m.sensor_type == sensor)
                .cloned()
                .collect(),
        }
    }

    /// The most recent measurement for a machine, optionally per sensor type.
    pub fn latest_measurement(
        &self,
        machine_id: i64,
        sensor_type: Option<&str>,
    ) -> Option<Measurement> {
        self.measurements(machine_id, sensor_type).into_iter().next()
    }

    // ==================== Events ====================

    /// Merge a batch of events into the global event cache.
    ///
    /// Same merge discipline as measurements, one global bucket, truncated to
    /// the most recent [`MAX_EVENTS`].
    pub fn add_events(&self, events: Vec<MachineEvent>) {
        {
            let mut cached = self.events.borrow_mut();
            merge_newest_first(&mut cached, events, |e| e.id, |e| e.timestamp, MAX_EVENTS);
        }
        self.emit(ModelEvent::EventsUpdated);
    }

    /// Events filtered by machine (`None` = all machines) and a minimum
    /// severity (inclusive). Newest first.
    pub fn events(&self, machine_id: Option<i64>, min_level: EventLevel) -> Vec<MachineEvent> {
        self.events
            .borrow()
            .iter()
            .filter(|e| machine_id.map_or(true, |id| e.machine_id == id) && e.level >= min_level)
            .cloned()
            .collect()
    }

    /// Count of Error and Critical events, per machine or globally.
    pub fn critical_event_count(&self, machine_id: Option<i64>) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| machine_id.map_or(true, |id| e.machine_id == id) && e.level.is_alerting())
            .count()
    }

    // ==================== Chat ====================

    /// Append a chat entry, evicting the oldest once the history is full.
    pub fn add_chat_message(&self, message: ChatMessage) {
        {
            let mut history = self.chat_history.borrow_mut();
            history.push_back(message.clone());
            if history.len() > MAX_CHAT_HISTORY {
                history.pop_front();
            }
        }
        self.emit(ModelEvent::ChatMessageAdded(message));
    }

    pub fn clear_chat_history(&self) {
        self.chat_history.borrow_mut().clear();
        self.emit(ModelEvent::ChatHistoryCleared);
    }

    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.chat_history.borrow().iter().cloned().collect()
    }

    // ==================== Analysis ====================

    /// Replace the latest analysis result. No history is kept.
    pub fn set_analysis_result(&self, result: AnalysisResult) {
        *self.latest_analysis.borrow_mut() = Some(result);
        self.emit(ModelEvent::AnalysisResultUpdated);
    }

    pub fn analysis_result(&self) -> Option<AnalysisResult> {
        self.latest_analysis.borrow().clone()
    }

    // ==================== Health ====================

    /// Replace the latest health status. No history is kept.
    pub fn set_health_status(&self, status: HealthStatus) {
        *self.health_status.borrow_mut() = Some(status);
        self.emit(ModelEvent::HealthStatusUpdated);
    }

    pub fn health_status(&self) -> Option<HealthStatus> {
        self.health_status.borrow().clone()
    }

    // ==================== Session state ====================

    /// Change the selected machine. Idempotent: re-selecting the current
    /// machine neither mutates nor notifies.
    pub fn set_selected_machine(&self, id: Option<i64>) {
        if self.selected_machine.get() == id {
            return;
        }
        self.selected_machine.set(id);
        self.emit(ModelEvent::SelectedMachineChanged(id));
    }

    pub fn selected_machine(&self) -> Option<i64> {
        self.selected_machine.get()
    }
}

/// Merge `batch` into `existing`: overwrite on id match, append otherwise,
/// then sort newest first and truncate to `cap`.
fn merge_newest_first<T>(
    existing: &mut Vec<T>,
    batch: Vec<T>,
    id: impl Fn(&T) -> i64,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
    cap: usize,
) {
    for item in batch {
        match existing.iter_mut().find(|e| id(e) == id(&item)) {
            Some(slot) => *slot = item,
            None => existing.push(item),
        }
    }

    existing.sort_by(|a, b| timestamp(b).cmp(&timestamp(a)));
    existing.truncate(cap);
}
