//! Presentation sink that records everything it is shown

use std::sync::{Arc, Mutex};
use std::time::Duration;

use durak::client::{PresentationSink, StatusLevel, TableView};
use durak::escrow::PayoutOutcome;
use durak::{GameOutcome, Role};

#[derive(Debug, Default)]
pub struct SinkLog {
    pub renders: Vec<TableView>,
    pub statuses: Vec<(String, StatusLevel)>,
    pub outcomes: Vec<(GameOutcome, Role)>,
    pub settlements: Vec<PayoutOutcome>,
    pub countdown: Vec<Duration>,
}

/// Cloneable handle; all clones share one log
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn PresentationSink> {
        Box::new(self.clone())
    }

    pub fn with_log<T>(&self, f: impl FnOnce(&SinkLog) -> T) -> T {
        f(&self.log.lock().unwrap())
    }

    pub fn last_status(&self) -> Option<(String, StatusLevel)> {
        self.with_log(|log| log.statuses.last().cloned())
    }

    pub fn last_view(&self) -> Option<TableView> {
        self.with_log(|log| log.renders.last().cloned())
    }

    pub fn outcome_count(&self) -> usize {
        self.with_log(|log| log.outcomes.len())
    }

    pub fn settlements(&self) -> Vec<PayoutOutcome> {
        self.with_log(|log| log.settlements.clone())
    }
}

impl PresentationSink for RecordingSink {
    fn render(&mut self, view: &TableView) {
        self.log.lock().unwrap().renders.push(view.clone());
    }

    fn status(&mut self, message: &str, level: StatusLevel) {
        self.log
            .lock()
            .unwrap()
            .statuses
            .push((message.to_string(), level));
    }

    fn outcome(&mut self, outcome: &GameOutcome, local_role: Role) {
        self.log.lock().unwrap().outcomes.push((*outcome, local_role));
    }

    fn settlement(&mut self, result: &PayoutOutcome) {
        self.log.lock().unwrap().settlements.push(result.clone());
    }

    fn timer(&mut self, remaining: Duration) {
        self.log.lock().unwrap().countdown.push(remaining);
    }
}
