//! Presenter: orchestrates user actions, the API client, and the cache
//!
//! The presenter is the only component that talks to [`ApiClient`] directly.
//! User intents come in as `on_*` calls; responses land in the [`DataModel`];
//! model change notifications are pumped back out as view updates. The view is
//! attachable after construction and every operation is a safe no-op until one
//! is attached.
//!
//! Everything here lives on the application's single event loop: the presenter
//! is constructed as `Rc<Presenter>` inside a `tokio::task::LocalSet`, and its
//! background work (model listener, client-signal listener, auto-refresh
//! ticker) runs as local tasks holding weak references.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::api::{ApiClient, ClientSignal};
use crate::error::Error;
use crate::model::{DataModel, ModelEvent};
use crate::types::{ChatMessage, ChatRole, EventLevel};
use crate::view::MainView;

/// Measurement window requested when a machine is selected.
const MEASUREMENT_LIMIT: u32 = 100;
/// Event window requested when a machine is selected.
const EVENT_LIMIT: u32 = 50;
/// Report window for the reports listing.
const REPORT_LIMIT: u32 = 20;
/// Time range analyzed by the anomaly analysis, in minutes.
const ANALYSIS_WINDOW_MINUTES: u32 = 60;

/// Auto-refresh timer state. The ticker task re-reads `interval_secs` on
/// every lap, so interval changes take effect on the next tick.
struct AutoRefresh {
    enabled: bool,
    interval_secs: u64,
    ticker: Option<tokio::task::JoinHandle<()>>,
}

/// Coordinates user actions with network calls and cache updates.
pub struct Presenter {
    model: Rc<DataModel>,
    client: Rc<ApiClient>,
    view: RefCell<Option<Rc<dyn MainView>>>,
    refresh: RefCell<AutoRefresh>,
}

impl Presenter {
    /// Create the presenter and start its listener tasks.
    ///
    /// Must be called within a `LocalSet` context; the model and client are
    /// owned by the composition root and shared here.
    pub fn new(model: Rc<DataModel>, client: Rc<ApiClient>) -> Rc<Self> {
        let presenter = Rc::new(Self {
            model,
            client,
            view: RefCell::new(None),
            refresh: RefCell::new(AutoRefresh {
                enabled: false,
                interval_secs: 30,
                ticker: None,
            }),
        });

        presenter.spawn_model_listener();
        presenter.spawn_client_listener();
        presenter
    }

    /// Attach the view the presenter renders through.
    pub fn attach_view(&self, view: Rc<dyn MainView>) {
        *self.view.borrow_mut() = Some(view);
    }

    fn view(&self) -> Option<Rc<dyn MainView>> {
        self.view.borrow().clone()
    }

    // ==================== Initialization ====================

    /// Load the initial health status and machine list.
    ///
    /// The two requests run concurrently with no ordering guarantee; each
    /// lands in the cache independently. No-op until a view is attached.
    pub async fn initialize(&self) {
        if self.view().is_none() {
            return;
        }
        tokio::join!(self.load_health_status(), self.load_machines());
    }

    // ==================== User actions ====================

    /// A machine was selected: remember it and load its telemetry.
    pub async fn on_machine_selected(&self, machine_id: i64) {
        self.model.set_selected_machine(Some(machine_id));
        tokio::join!(
            self.load_measurements(machine_id),
            self.load_events(machine_id)
        );
    }

    /// Reload the machine list, plus the selected machine's telemetry.
    pub async fn on_refresh_clicked(&self) {
        let selected = self.model.selected_machine();
        tokio::join!(self.load_machines(), async {
            if let Some(machine_id) = selected {
                tokio::join!(
                    self.load_measurements(machine_id),
                    self.load_events(machine_id)
                );
            }
        });

        if let Some(view) = self.view() {
            view.show_info("data refreshed");
        }
    }

    /// Send a chat message with the selected machine as context.
    ///
    /// The user entry is cached and echoed optimistically before the request
    /// goes out; a failed request leaves it in place and surfaces a
    /// chat-specific error.
    pub async fn on_send_chat_message(&self, message: &str) {
        let Some(view) = self.view() else { return };

        if message.trim().is_empty() {
            view.show_error(&Error::Validation("please enter a message".into()).to_string());
            return;
        }

        self.model.add_chat_message(ChatMessage::user(message));
        view.append_chat_message(ChatRole::User, message);

        let machine_id = self.model.selected_machine();
        match self.client.send_chat(message, machine_id).await {
            Ok(reply) => {
                self.model.add_chat_message(reply.clone());
                if let Some(view) = self.view() {
                    view.append_chat_message(ChatRole::Assistant, &reply.content);
                }
            }
            Err(e) => {
                if let Some(view) = self.view() {
                    view.show_error(&format!("chat failed: {}", e));
                }
            }
        }
    }

    /// Run the anomaly analysis for the selected machine.
    pub async fn on_analyze_clicked(&self) {
        let Some(view) = self.view() else { return };

        let Some(machine_id) = self.model.selected_machine() else {
            view.show_error(&Error::Validation("please select a machine first".into()).to_string());
            return;
        };

        view.show_info("running analysis...");

        match self
            .client
            .analyze(machine_id, None, ANALYSIS_WINDOW_MINUTES)
            .await
        {
            Ok(result) => {
                self.model.set_analysis_result(result.clone());
                if let Some(view) = self.view() {
                    view.set_analysis_result(&result.summary, result.anomalies_detected);
                }
            }
            Err(e) => {
                if let Some(view) = self.view() {
                    view.show_error(&format!("analysis failed: {}", e));
                }
            }
        }
    }

    /// Rebind the API base URL and re-check health against it.
    pub async fn on_connect_clicked(&self, server_url: &str) {
        let Some(view) = self.view() else { return };

        if server_url.trim().is_empty() {
            view.show_error(&Error::Validation("server URL must not be empty".into()).to_string());
            return;
        }

        self.client.set_base_url(server_url);
        self.load_health_status().await;
    }

    /// Clear the chat transcript. Local only; nothing is sent.
    pub fn on_clear_chat_clicked(&self) {
        self.model.clear_chat_history();
        if let Some(view) = self.view() {
            view.show_info("chat history cleared");
        }
    }

    /// List stored reports, scoped to the selected machine if there is one.
    pub async fn on_reports_requested(&self) {
        let Some(view) = self.view() else { return };

        let machine_id = self.model.selected_machine();
        match self.client.reports(machine_id, REPORT_LIMIT).await {
            Ok(reports) => {
                let notice = match reports.first() {
                    Some(latest) => format!(
                        "{} report(s); latest ({}): {}",
                        reports.len(),
                        latest.report_type,
                        latest.report_text
                    ),
                    None => "no reports stored".to_string(),
                };
                view.show_info(&notice);
            }
            Err(e) => self.handle_api_error(&format!("loading reports failed: {}", e)),
        }
    }

    // ==================== Auto-refresh ====================

    /// Enable or disable the periodic refresh timer.
    pub fn set_auto_refresh(self: &Rc<Self>, enabled: bool) {
        let mut refresh = self.refresh.borrow_mut();
        refresh.enabled = enabled;

        if enabled {
            if refresh.ticker.is_none() {
                refresh.ticker = Some(self.spawn_ticker());
            }
        } else if let Some(ticker) = refresh.ticker.take() {
            ticker.abort();
        }
    }

    /// Change the refresh cadence; takes effect on the next tick.
    pub fn set_refresh_interval(&self, seconds: u64) {
        self.refresh.borrow_mut().interval_secs = seconds.max(1);
    }

    pub fn auto_refresh_enabled(&self) -> bool {
        self.refresh.borrow().enabled
    }

    fn spawn_ticker(self: &Rc<Self>) -> tokio::task::JoinHandle<()> {
        let weak = Rc::downgrade(self);
        tokio::task::spawn_local(async move {
            loop {
                let interval = {
                    let Some(presenter) = weak.upgrade() else { break };
                    let refresh = presenter.refresh.borrow();
                    if !refresh.enabled {
                        break;
                    }
                    refresh.interval_secs
                };

                tokio::time::sleep(Duration::from_secs(interval)).await;

                let Some(presenter) = weak.upgrade() else { break };
                if !presenter.refresh.borrow().enabled {
                    break;
                }
                tracing::debug!("auto-refresh tick");
                presenter.on_refresh_clicked().await;
            }
        })
    }

    // ==================== API calls ====================

    async fn load_health_status(&self) {
        match self.client.health_check().await {
            Ok(status) => {
                let healthy = status.is_healthy;
                self.model.set_health_status(status);
                if let Some(view) = self.view() {
                    view.set_connection_status(healthy);
                }
            }
            Err(e) => {
                if let Some(view) = self.view() {
                    view.set_connection_status(false);
                }
                self.handle_api_error(&format!("health check failed: {}", e));
            }
        }
    }

    async fn load_machines(&self) {
        match self.client.machines().await {
            Ok(machines) => self.model.set_machines(machines),
            Err(e) => self.handle_api_error(&format!("loading machines failed: {}", e)),
        }
    }

    async fn load_measurements(&self, machine_id: i64) {
        match self
            .client
            .measurements(machine_id, None, MEASUREMENT_LIMIT)
            .await
        {
            Ok(measurements) => {
                self.model.add_measurements(machine_id, measurements.clone());
                if let Some(view) = self.view() {
                    view.update_chart(&measurements);
                }
            }
            Err(e) => self.handle_api_error(&format!("loading measurements failed: {}", e)),
        }
    }

    async fn load_events(&self, machine_id: i64) {
        match self.client.events(Some(machine_id), None, EVENT_LIMIT).await {
            Ok(events) => self.model.add_events(events),
            Err(e) => self.handle_api_error(&format!("loading events failed: {}", e)),
        }
    }

    // ==================== Notifications ====================

    fn spawn_model_listener(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let mut rx = self.model.subscribe();
        tokio::task::spawn_local(async move {
            while let Some(event) = rx.recv().await {
                let Some(presenter) = weak.upgrade() else { break };
                presenter.on_model_event(event);
            }
        });
    }

    fn on_model_event(&self, event: ModelEvent) {
        let Some(view) = self.view() else { return };

        match event {
            ModelEvent::MachinesUpdated => {
                view.update_machine_list(&self.model.machines());
            }
            ModelEvent::EventsUpdated => {
                let events = self
                    .model
                    .events(self.model.selected_machine(), EventLevel::Info);
                view.update_events_table(&events);
            }
            ModelEvent::HealthStatusUpdated => {
                if let Some(status) = self.model.health_status() {
                    view.set_connection_status(status.is_healthy);
                }
            }
            _ => {}
        }
    }

    fn spawn_client_listener(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let mut rx = self.client.subscribe();
        tokio::task::spawn_local(async move {
            while let Some(signal) = rx.recv().await {
                let Some(presenter) = weak.upgrade() else { break };
                if let ClientSignal::ConnectionError(_) = signal {
                    if let Some(view) = presenter.view() {
                        view.set_connection_status(false);
                    }
                }
            }
        });
    }

    // ==================== Error handling ====================

    /// Blanket funnel for API failures: surface the message and mark the
    /// connection as down, whichever feature the failed call belonged to.
    fn handle_api_error(&self, message: &str) {
        tracing::warn!(message, "API error surfaced to view");
        let Some(view) = self.view() else { return };
        view.show_error(message);
        view.set_connection_status(false);
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        if let Some(ticker) = self.refresh.borrow_mut().ticker.take() {
            ticker.abort();
        }
    }
}
