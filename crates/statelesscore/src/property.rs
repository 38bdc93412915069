use crate::NodeError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Value type a property is validated against before the pass starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    String,
    Integer,
    Boolean,
    Duration,
}

impl PropertyKind {
    /// Check that `raw` parses as this kind.
    pub fn check(&self, raw: &str) -> Result<(), String> {
        match self {
            PropertyKind::String => Ok(()),
            PropertyKind::Integer => raw
                .trim()
                .parse::<i64>()
                .map(|_| ())
                .map_err(|e| format!("'{}' is not an integer: {}", raw, e)),
            PropertyKind::Boolean => parse_bool(raw).map(|_| ()),
            PropertyKind::Duration => parse_duration(raw).map(|_| ()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub name: String,
    pub description: String,
    pub kind: PropertyKind,
    pub default: Option<String>,
    pub required: bool,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind,
            default: None,
            required: false,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Validated property values handed to a node factory.
///
/// Declared properties have their defaults applied; dynamic properties (if
/// the node type accepts them) are kept separately in declaration order.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    values: HashMap<String, String>,
    dynamic: BTreeMap<String, String>,
}

impl PropertyMap {
    pub fn new(values: HashMap<String, String>, dynamic: BTreeMap<String, String>) -> Self {
        Self { values, dynamic }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn require(&self, name: &str) -> Result<&str, NodeError> {
        self.get(name)
            .ok_or_else(|| NodeError::MissingProperty(name.to_string()))
    }

    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    pub fn integer(&self, name: &str) -> Result<i64, NodeError> {
        let raw = self.require(name)?;
        raw.trim().parse().map_err(|e| NodeError::InvalidProperty {
            name: name.to_string(),
            reason: format!("{}", e),
        })
    }

    pub fn boolean(&self, name: &str) -> Result<bool, NodeError> {
        parse_bool(self.require(name)?).map_err(|reason| NodeError::InvalidProperty {
            name: name.to_string(),
            reason,
        })
    }

    pub fn duration(&self, name: &str) -> Result<Duration, NodeError> {
        parse_duration(self.require(name)?).map_err(|reason| NodeError::InvalidProperty {
            name: name.to_string(),
            reason,
        })
    }

    pub fn dynamic(&self) -> &BTreeMap<String, String> {
        &self.dynamic
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("'{}' is not a boolean", other)),
    }
}

/// Parse durations written as `<amount> <unit>`, e.g. `100 millis`, `5 sec`.
///
/// A bare number is read as milliseconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let text = raw.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (amount, unit) = text.split_at(split);
    let amount: f64 = amount
        .parse()
        .map_err(|_| format!("'{}' does not start with a number", raw))?;

    let millis_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "ms" | "milli" | "millis" | "millisecond" | "milliseconds" => 1.0,
        "ns" | "nano" | "nanos" | "nanosecond" | "nanoseconds" => 1e-6,
        "us" | "micro" | "micros" | "microsecond" | "microseconds" => 1e-3,
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
        "d" | "day" | "days" => 86_400_000.0,
        other => return Err(format!("unknown duration unit '{}'", other)),
    };

    Duration::try_from_secs_f64(amount * millis_per_unit / 1_000.0)
        .map_err(|e| format!("'{}' is not a valid duration: {}", raw, e))
}

/// Replace `#{name}` references with parameter values.
///
/// `##{` produces a literal `#{`. An unknown parameter is an error naming it.
pub fn substitute_parameters(
    raw: &str,
    parameters: &HashMap<String, String>,
) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(pos) = rest.find("#{") {
        if pos > 0 && rest[..pos].ends_with('#') {
            out.push_str(&rest[..pos - 1]);
            out.push_str("#{");
            rest = &rest[pos + 2..];
            continue;
        }
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unterminated parameter reference in '{}'", raw))?;
        let name = &after[..end];
        let value = parameters
            .get(name)
            .ok_or_else(|| format!("parameter '{}' has no value", name))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_in_common_units() {
        assert_eq!(parse_duration("100 millis").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("5 sec").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2min").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1.5 s").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("3 fortnights").is_err());
    }

    #[test]
    fn parameters_are_substituted() {
        let params = HashMap::from([("Lines Per Split".to_string(), "3".to_string())]);
        assert_eq!(substitute_parameters("#{Lines Per Split}", &params).unwrap(), "3");
        assert_eq!(
            substitute_parameters("n=#{Lines Per Split}!", &params).unwrap(),
            "n=3!"
        );
        assert_eq!(substitute_parameters("plain", &params).unwrap(), "plain");
    }

    #[test]
    fn escaped_and_missing_parameters() {
        let params = HashMap::new();
        assert_eq!(substitute_parameters("##{x}", &params).unwrap(), "#{x}");
        let err = substitute_parameters("#{missing}", &params).unwrap_err();
        assert!(err.contains("missing"));
        assert!(substitute_parameters("#{open", &params).is_err());
    }

    #[test]
    fn property_map_typed_access() {
        let map = PropertyMap::new(
            HashMap::from([
                ("Count".to_string(), "3".to_string()),
                ("Wait".to_string(), "5 sec".to_string()),
            ]),
            BTreeMap::new(),
        );
        assert_eq!(map.integer("Count").unwrap(), 3);
        assert_eq!(map.duration("Wait").unwrap(), Duration::from_secs(5));
        assert_eq!(
            map.integer("Absent"),
            Err(NodeError::MissingProperty("Absent".to_string()))
        );
        assert_eq!(map.get_or("Absent", "x"), "x");
    }
}
