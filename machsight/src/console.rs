//! Line-oriented console frontend
//!
//! The smallest useful [`MainView`]: everything the presenter reports is
//! printed as plain lines. Connection-status changes are only printed when
//! the status actually flips, so steady-state refreshes stay quiet.

use std::cell::Cell;

use machsight_core::{ChatRole, Machine, MachineEvent, Measurement};

/// Console implementation of the presenter's view interface.
#[derive(Default)]
pub struct ConsoleView {
    last_connection: Cell<Option<bool>>,
}

impl machsight_core::MainView for ConsoleView {
    fn show_error(&self, message: &str) {
        eprintln!("error: {}", message);
    }

    fn show_info(&self, message: &str) {
        println!("{}", message);
    }

    fn set_connection_status(&self, connected: bool) {
        if self.last_connection.get() == Some(connected) {
            return;
        }
        self.last_connection.set(Some(connected));
        if connected {
            println!("connected to backend");
        } else {
            println!("backend disconnected");
        }
    }

    fn append_chat_message(&self, role: ChatRole, content: &str) {
        println!("[{}] {}", role, content);
    }

    fn update_machine_list(&self, machines: &[Machine]) {
        println!("{} machine(s):", machines.len());
        for machine in machines {
            println!(
                "  #{:<4} {:<20} {:<12} {}",
                machine.id,
                machine.name,
                machine.machine_type,
                machine.location.as_deref().unwrap_or("-")
            );
        }
    }

    fn update_chart(&self, measurements: &[Measurement]) {
        match measurements.first() {
            Some(latest) => println!(
                "{} measurement(s); latest: {} = {:.2} {} at {}",
                measurements.len(),
                latest.sensor_type,
                latest.value,
                latest.unit.as_deref().unwrap_or(""),
                latest.timestamp.format("%H:%M:%S")
            ),
            None => println!("no measurements"),
        }
    }

    fn update_events_table(&self, events: &[MachineEvent]) {
        println!("{} event(s):", events.len());
        for event in events.iter().take(10) {
            println!(
                "  {} [{:<8}] machine {}: {}",
                event.timestamp.format("%H:%M:%S"),
                event.level,
                event.machine_id,
                event.message
            );
        }
        if events.len() > 10 {
            println!("  ... and {} more", events.len() - 10);
        }
    }

    fn set_analysis_result(&self, summary: &str, anomaly_count: i64) {
        println!("analysis: {} anomaly(ies)", anomaly_count);
        println!("  {}", summary);
    }
}
