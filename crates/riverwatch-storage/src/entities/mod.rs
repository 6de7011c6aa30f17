pub mod phase;
pub mod source_reading;
pub mod trigger;
pub mod trigger_history;
