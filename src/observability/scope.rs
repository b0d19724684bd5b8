//! Scoped begin/complete logging
//!
//! `ObservationScope::new("EXECUTE")` logs `EXECUTE_BEGIN`; `complete()`
//! logs `EXECUTE_COMPLETE` with the elapsed time, `fail()` logs
//! `EXECUTE_ERROR`. A scope dropped without either logs `EXECUTE_ERROR`
//! with reason `abandoned`, which is what a cancelled future leaves behind.

use std::cell::Cell;
use std::time::Instant;

use super::logger::Logger;

pub struct ObservationScope<'a> {
    name: &'a str,
    finished: Cell<bool>,
    fields: Vec<(&'a str, String)>,
    timer: Timer,
}

impl<'a> ObservationScope<'a> {
    pub fn new(name: &'a str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Fields are repeated on every line the scope logs
    pub fn with_fields(name: &'a str, fields: &[(&'a str, &str)]) -> Self {
        Logger::info(&format!("{}_BEGIN", name), fields);
        Self {
            name,
            finished: Cell::new(false),
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            timer: Timer::new(),
        }
    }

    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    pub fn complete_with_fields(self, extra: &[(&str, &str)]) {
        self.finished.set(true);
        let elapsed = self.timer.elapsed_ms();
        let mut fields = self.borrowed_fields();
        fields.extend(extra.iter().copied());
        fields.push(("elapsed_ms", elapsed.as_str()));
        Logger::info(&format!("{}_COMPLETE", self.name), &fields);
    }

    pub fn fail(self, reason: &str) {
        self.finished.set(true);
        self.log_error(reason);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.get()
    }

    fn borrowed_fields(&self) -> Vec<(&str, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }

    fn log_error(&self, reason: &str) {
        let mut fields = self.borrowed_fields();
        fields.push(("reason", reason));
        Logger::error(&format!("{}_ERROR", self.name), &fields);
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.finished.get() {
            self.log_error("abandoned");
        }
    }
}

/// Wall-clock duration since construction
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed_ms(&self) -> String {
        self.start.elapsed().as_millis().to_string()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
