use serde::{Deserialize, Deserializer, Serialize, Serializer};
use statelesscore::Payload;
use std::collections::BTreeSet;
use std::fmt;

/// Attribute naming the port a FAILURE payload arrived at.
pub const FAILURE_PORT_ATTRIBUTE: &str = "failure.port.name";
/// Attributes describing a node failure that drained a payload.
pub const FAILURE_NODE_ID_ATTRIBUTE: &str = "failure.node.id";
pub const FAILURE_NODE_TYPE_ATTRIBUTE: &str = "failure.node.type";
pub const FAILURE_REASON_ATTRIBUTE: &str = "failure.reason";

/// Terminal classification of a payload after one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Outcome {
    Output,
    Original,
    /// `port` is `None` for payloads drained by a node failure rather than
    /// delivered to a configured failure port.
    Failure { port: Option<String> },
    Timeout,
}

impl Outcome {
    pub fn failure_port(port: impl Into<String>) -> Self {
        Outcome::Failure { port: Some(port.into()) }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Output => f.write_str("OUTPUT"),
            Outcome::Original => f.write_str("ORIGINAL"),
            Outcome::Failure { port: Some(port) } => write!(f, "FAILURE({})", port),
            Outcome::Failure { port: None } => f.write_str("FAILURE"),
            Outcome::Timeout => f.write_str("TIMEOUT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutedPayload {
    pub outcome: Outcome,
    pub payload: Payload,
}

/// A payload that reached an output port with nowhere further to go.
#[derive(Debug, Clone)]
pub struct TerminalPayload {
    pub port_name: String,
    pub payload: Payload,
}

/// Output port names whose arrivals count as failures.
///
/// Parsed from a comma-separated list; entries are trimmed and matched
/// exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailurePorts(BTreeSet<String>);

impl FailurePorts {
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn contains(&self, port_name: &str) -> bool {
        self.0.contains(port_name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Serialize for FailurePorts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let joined: Vec<&str> = self.names().collect();
        serializer.serialize_str(&joined.join(","))
    }
}

impl<'de> Deserialize<'de> for FailurePorts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            List(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => FailurePorts::parse(&text),
            Raw::List(list) => FailurePorts::parse(&list.join(",")),
        })
    }
}

/// Turns the raw results of a pass into outcome-tagged payloads.
#[derive(Debug, Clone, Default)]
pub struct PortOutcomeRouter {
    failure_ports: FailurePorts,
}

impl PortOutcomeRouter {
    pub fn new(failure_ports: FailurePorts) -> Self {
        Self { failure_ports }
    }

    pub fn classify(&self, port_name: &str) -> Outcome {
        if self.failure_ports.contains(port_name) {
            Outcome::failure_port(port_name)
        } else {
            Outcome::Output
        }
    }

    /// Route one completed pass.
    ///
    /// The original input, when there was one, yields exactly one ORIGINAL
    /// regardless of how many payloads it fanned out into. A pass in which
    /// a node failed yields no ORIGINAL; its drained payloads stand in.
    pub fn route(
        &self,
        original: Option<Payload>,
        terminal: Vec<TerminalPayload>,
        unrouted_failures: Vec<Payload>,
    ) -> Vec<RoutedPayload> {
        let mut routed = Vec::with_capacity(terminal.len() + unrouted_failures.len() + 1);

        for TerminalPayload { port_name, payload } in terminal {
            let outcome = self.classify(&port_name);
            let payload = match &outcome {
                Outcome::Failure { .. } => payload.with_attribute(FAILURE_PORT_ATTRIBUTE, port_name),
                _ => payload,
            };
            routed.push(RoutedPayload { outcome, payload });
        }

        let node_failed = !unrouted_failures.is_empty();
        routed.extend(unrouted_failures.into_iter().map(|payload| RoutedPayload {
            outcome: Outcome::Failure { port: None },
            payload,
        }));

        if let Some(original) = original.filter(|_| !node_failed) {
            routed.push(RoutedPayload {
                outcome: Outcome::Original,
                payload: original,
            });
        }

        routed
    }

    /// The single outcome of an invocation whose deadline expired.
    pub fn timed_out(&self, original: Option<Payload>) -> Vec<RoutedPayload> {
        vec![RoutedPayload {
            outcome: Outcome::Timeout,
            payload: original.unwrap_or_default(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal(port: &str, content: &str) -> TerminalPayload {
        TerminalPayload {
            port_name: port.to_string(),
            payload: Payload::from(content),
        }
    }

    #[test]
    fn failure_names_are_trimmed_and_exact() {
        let router = PortOutcomeRouter::new(FailurePorts::parse("Other, A,    B,C"));

        for port in ["Other", "A", "B", "C"] {
            assert_eq!(router.classify(port), Outcome::failure_port(port));
        }
        for port in ["a", " B", "Out", "Others", ""] {
            assert_eq!(router.classify(port), Outcome::Output);
        }
    }

    #[test]
    fn empty_failure_set_never_fails() {
        let router = PortOutcomeRouter::new(FailurePorts::parse(" , "));
        assert_eq!(router.classify("failure"), Outcome::Output);
    }

    #[test]
    fn one_original_regardless_of_fan_out() {
        let router = PortOutcomeRouter::new(FailurePorts::parse("failure"));
        let routed = router.route(
            Some(Payload::from("in")),
            vec![terminal("Out", "1"), terminal("Out", "2"), terminal("failure", "3")],
            Vec::new(),
        );

        let count = |o: &Outcome| routed.iter().filter(|r| &r.outcome == o).count();
        assert_eq!(count(&Outcome::Output), 2);
        assert_eq!(count(&Outcome::Original), 1);
        assert_eq!(count(&Outcome::failure_port("failure")), 1);

        let failed = routed
            .iter()
            .find(|r| r.outcome == Outcome::failure_port("failure"))
            .unwrap();
        assert_eq!(failed.payload.attribute(FAILURE_PORT_ATTRIBUTE), Some("failure"));
    }

    #[test]
    fn node_failure_suppresses_original() {
        let router = PortOutcomeRouter::new(FailurePorts::parse("failure"));
        let routed = router.route(
            Some(Payload::from("Hello World")),
            Vec::new(),
            vec![Payload::from("Hello World")],
        );

        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].outcome, Outcome::Failure { port: None });
    }

    #[test]
    fn no_original_without_input() {
        let router = PortOutcomeRouter::default();
        let routed = router.route(None, vec![terminal("Out", "x")], Vec::new());
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].outcome, Outcome::Output);
    }

    #[test]
    fn failure_ports_deserialize_from_text_or_list() {
        let from_text: FailurePorts = serde_json::from_str("\"a, b\"").unwrap();
        let from_list: FailurePorts = serde_json::from_str("[\"a\", \" b \"]").unwrap();
        assert_eq!(from_text, from_list);
        assert!(from_text.contains("b"));
    }
}
