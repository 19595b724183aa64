//! Participant-side match driving: controller, table view and turn timer

pub mod controller;
pub mod timer;
pub mod view;

pub use controller::{MatchController, MatchReport};
pub use timer::{TimerChange, TimerState, TurnTimer};
pub use view::{outcome_text, AllowedButtons, HandCard, LogSink, PresentationSink, StatusLevel, TableView};
