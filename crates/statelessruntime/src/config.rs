use crate::router::FailurePorts;
use serde::{Deserialize, Deserializer, Serialize};
use statelesscore::{parse_duration, FlowError, FlowSpecification, Severity};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the flow document is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpecificationStrategy {
    Inline,
    #[default]
    FileReference,
}

/// Engine configuration: the options one stateless engine is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    #[serde(default)]
    pub specification_source: SpecificationStrategy,
    /// The inline document, or the path to it for `file-reference`
    pub specification: String,
    pub library_directory: PathBuf,
    #[serde(default, deserialize_with = "comma_separated_paths")]
    pub additional_library_directories: Vec<PathBuf>,
    #[serde(default)]
    pub input_port_name: Option<String>,
    #[serde(default)]
    pub failure_port_names: FailurePorts,
    #[serde(default, with = "duration_text")]
    pub timeout_duration: Option<Duration>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default = "default_bulletin_level")]
    pub bulletin_level: Severity,
}

fn default_bulletin_level() -> Severity {
    Severity::Warn
}

impl EngineConfig {
    pub fn inline(document: impl Into<String>, library_directory: impl Into<PathBuf>) -> Self {
        Self::new(SpecificationStrategy::Inline, document.into(), library_directory.into())
    }

    pub fn from_spec_file(path: impl AsRef<Path>, library_directory: impl Into<PathBuf>) -> Self {
        Self::new(
            SpecificationStrategy::FileReference,
            path.as_ref().display().to_string(),
            library_directory.into(),
        )
    }

    /// Inline configuration for an in-memory specification.
    pub fn for_spec(
        spec: &FlowSpecification,
        library_directory: impl Into<PathBuf>,
    ) -> Result<Self, FlowError> {
        Ok(Self::inline(spec.to_json_string()?, library_directory))
    }

    fn new(strategy: SpecificationStrategy, specification: String, library_directory: PathBuf) -> Self {
        Self {
            specification_source: strategy,
            specification,
            library_directory,
            additional_library_directories: Vec::new(),
            input_port_name: None,
            failure_port_names: FailurePorts::default(),
            timeout_duration: None,
            parameters: HashMap::new(),
            bulletin_level: default_bulletin_level(),
        }
    }

    pub fn with_additional_library_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.additional_library_directories.push(dir.into());
        self
    }

    pub fn with_input_port(mut self, name: impl Into<String>) -> Self {
        self.input_port_name = Some(name.into());
        self
    }

    pub fn with_failure_ports(mut self, names: &str) -> Self {
        self.failure_port_names = FailurePorts::parse(names);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_duration = Some(timeout);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Build from flat string options, as a host would pass them.
    ///
    /// Keys outside the recognised option names are taken as parameter
    /// values.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, FlowError> {
        let get = |key: &str| properties.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| FlowError::Configuration(format!("'{}' is required", key)))
        };

        let strategy = match get("specification-source") {
            None | Some("file-reference") => SpecificationStrategy::FileReference,
            Some("inline") => SpecificationStrategy::Inline,
            Some(other) => {
                return Err(FlowError::Configuration(format!(
                    "unknown specification-source '{}'",
                    other
                )))
            }
        };

        let mut config = Self::new(
            strategy,
            required("specification")?.to_string(),
            PathBuf::from(required("library-directory")?),
        );
        if let Some(dirs) = get("additional-library-directories") {
            config.additional_library_directories = split_paths(dirs);
        }
        config.input_port_name = get("input-port-name").map(str::to_string);
        if let Some(names) = get("failure-port-names") {
            config.failure_port_names = FailurePorts::parse(names);
        }
        if let Some(timeout) = get("timeout-duration") {
            config.timeout_duration = Some(
                parse_duration(timeout)
                    .map_err(|e| FlowError::Configuration(format!("timeout-duration: {}", e)))?,
            );
        }
        if let Some(level) = get("bulletin-level") {
            config.bulletin_level = level
                .parse()
                .map_err(|e| FlowError::Configuration(format!("bulletin-level: {}", e)))?;
        }

        for (key, value) in properties {
            if !RECOGNISED_OPTIONS.contains(&key.as_str()) {
                config.parameters.insert(key.clone(), value.clone());
            }
        }

        Ok(config)
    }

    /// Read a JSON config file; relative paths resolve against its directory.
    pub fn from_file(path: &Path) -> Result<Self, FlowError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: EngineConfig = serde_json::from_str(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        if config.specification_source == SpecificationStrategy::FileReference {
            config.specification = base.join(&config.specification).display().to_string();
        }
        config.library_directory = base.join(&config.library_directory);
        for dir in &mut config.additional_library_directories {
            *dir = base.join(&*dir);
        }
        Ok(config)
    }

    /// Fetch the flow document text.
    pub async fn load_document(&self) -> Result<String, FlowError> {
        match self.specification_source {
            SpecificationStrategy::Inline => Ok(self.specification.clone()),
            SpecificationStrategy::FileReference => {
                tokio::fs::read_to_string(&self.specification).await.map_err(|e| {
                    FlowError::Configuration(format!(
                        "cannot read specification '{}': {}",
                        self.specification, e
                    ))
                })
            }
        }
    }
}

const RECOGNISED_OPTIONS: &[&str] = &[
    "specification-source",
    "specification",
    "library-directory",
    "additional-library-directories",
    "input-port-name",
    "failure-port-names",
    "timeout-duration",
    "bulletin-level",
];

fn split_paths(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Accepts either a comma-separated string or a list of paths.
fn comma_separated_paths<'de, D>(deserializer: D) -> Result<Vec<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        List(Vec<PathBuf>),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => split_paths(&text),
        Raw::List(list) => list,
    })
}

mod duration_text {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&format!("{} millis", d.as_millis())),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|text| statelesscore::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_recognised_options() {
        let config = EngineConfig::from_properties(&props(&[
            ("specification", "flows/split.json"),
            ("library-directory", "lib"),
            ("additional-library-directories", "json-lib, compress-lib ,"),
            ("input-port-name", "In"),
            ("failure-port-names", "Other, A,    B,C"),
            ("timeout-duration", "100 millis"),
            ("Lines Per Split", "3"),
        ]))
        .unwrap();

        assert_eq!(config.specification_source, SpecificationStrategy::FileReference);
        assert_eq!(
            config.additional_library_directories,
            vec![PathBuf::from("json-lib"), PathBuf::from("compress-lib")]
        );
        assert_eq!(config.input_port_name.as_deref(), Some("In"));
        assert!(config.failure_port_names.contains("B"));
        assert_eq!(config.timeout_duration, Some(Duration::from_millis(100)));
        assert_eq!(config.parameters.get("Lines Per Split").map(String::as_str), Some("3"));
        assert_eq!(config.bulletin_level, Severity::Warn);
    }

    #[test]
    fn rejects_missing_and_invalid_options() {
        let err = EngineConfig::from_properties(&props(&[("specification", "x")])).unwrap_err();
        assert!(matches!(err, FlowError::Configuration(ref m) if m.contains("library-directory")));

        let err = EngineConfig::from_properties(&props(&[
            ("specification", "x"),
            ("library-directory", "lib"),
            ("timeout-duration", "whenever"),
        ]))
        .unwrap_err();
        assert!(matches!(err, FlowError::Configuration(ref m) if m.contains("timeout-duration")));
    }

    #[test]
    fn config_file_paths_are_relative_to_the_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(
            &path,
            r#"{
                "specification": "flow.json",
                "library-directory": "lib",
                "additional-library-directories": ["extra"],
                "failure-port-names": "failure",
                "timeout-duration": "5 sec"
            }"#,
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.library_directory, dir.path().join("lib"));
        assert_eq!(config.additional_library_directories, vec![dir.path().join("extra")]);
        assert_eq!(
            PathBuf::from(&config.specification),
            dir.path().join("flow.json")
        );
        assert!(config.failure_port_names.contains("failure"));
        assert_eq!(config.timeout_duration, Some(Duration::from_secs(5)));
    }
}
