use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Bulletin severity, ordered `Info < Warn < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFO" | "DEBUG" | "TRACE" => Ok(Severity::Info),
            "WARN" | "WARNING" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse::<Severity>()
            .map_err(serde::de::Error::custom)
    }
}

/// A log event raised by a node during a pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulletinEvent {
    pub severity: Severity,
    pub message: String,
    pub source_id: String,
    pub source_type: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-node handle for raising bulletins.
#[derive(Clone)]
pub struct BulletinEmitter {
    source_id: String,
    source_type: String,
    collector: BulletinCollector,
}

impl BulletinEmitter {
    pub fn emit(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info => tracing::info!(node = %self.source_id, "{}", message),
            Severity::Warn => tracing::warn!(node = %self.source_id, "{}", message),
            Severity::Error => tracing::error!(node = %self.source_id, "{}", message),
        }
        self.collector.record(BulletinEvent {
            severity,
            message,
            source_id: self.source_id.clone(),
            source_type: self.source_type.clone(),
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(Severity::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(Severity::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(Severity::Error, message);
    }
}

/// Accumulates bulletins for one invocation and filters them by severity.
///
/// Clones share the same buffer, so a collector can be read after the pass
/// that fed it was abandoned.
#[derive(Clone)]
pub struct BulletinCollector {
    threshold: Severity,
    events: Arc<Mutex<Vec<BulletinEvent>>>,
}

impl BulletinCollector {
    pub fn new(threshold: Severity) -> Self {
        Self {
            threshold,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn threshold(&self) -> Severity {
        self.threshold
    }

    pub fn emitter(&self, source_id: impl Into<String>, source_type: impl Into<String>) -> BulletinEmitter {
        BulletinEmitter {
            source_id: source_id.into(),
            source_type: source_type.into(),
            collector: self.clone(),
        }
    }

    /// Events below the threshold are dropped on arrival.
    pub fn record(&self, event: BulletinEvent) {
        if event.severity < self.threshold {
            return;
        }
        // A poisoned buffer still holds valid events.
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push(event);
    }

    /// Snapshot of the surfaced bulletins so far.
    pub fn surfaced(&self) -> Vec<BulletinEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_and_parsing() {
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warn);
        assert_eq!("ERROR".parse::<Severity>().unwrap(), Severity::Error);
        assert!("loud".parse::<Severity>().is_err());
        assert_eq!(serde_json::from_str::<Severity>("\"debug\"").unwrap(), Severity::Info);
    }

    #[test]
    fn info_is_dropped_at_warn_threshold() {
        let collector = BulletinCollector::new(Severity::Warn);
        let emitter = collector.emitter("node-1", "debug.log");

        emitter.info("quiet");
        assert!(collector.surfaced().is_empty());

        emitter.warn("careful");
        emitter.error("broken");
        let surfaced = collector.surfaced();
        assert_eq!(surfaced.len(), 2);
        assert_eq!(surfaced[0].message, "careful");
        assert_eq!(surfaced[1].severity, Severity::Error);
        assert_eq!(surfaced[1].source_id, "node-1");
    }
}
