//! Harness configuration
//!
//! Defaults are compiled in; an optional TOML file overrides directories,
//! the container runtime, the session supervisor, JaCoCo locations and
//! individual catalog entries.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{BudgetDiscipline, Catalog, ServiceId, ServiceSpec, ToolId, ToolSpec};

/// Which mechanism hosts local service sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorKind {
    /// Detached tmux sessions named after the service
    #[default]
    Tmux,
    /// Child processes owned by the harness process
    Process,
}

/// JaCoCo locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JacocoConfig {
    /// Java launcher used for the report CLI
    pub java: String,
    /// `jacocoagent.jar` attached to local services
    pub agent_jar: PathBuf,
    /// `jacococli.jar` used to render reports
    pub cli_jar: PathBuf,
}

impl Default for JacocoConfig {
    fn default() -> Self {
        Self {
            java: "java".into(),
            agent_jar: PathBuf::from("jacoco/jacocoagent.jar"),
            cli_jar: PathBuf::from("jacoco/jacococli.jar"),
        }
    }
}

/// Fully resolved harness configuration
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Root of the `results/<service>/<tool>/` tree
    pub results_dir: PathBuf,
    /// Directory holding the OpenAPI specifications, mounted read-only into tools
    pub specs_dir: PathBuf,
    /// Lock files and raw coverage captures
    pub state_dir: PathBuf,
    /// Container CLI (`docker`, `podman`)
    pub container_runtime: String,
    /// Container network; `host` lets tools reach `localhost` services
    pub network: Option<String>,
    /// Session mechanism for local services
    pub supervisor: SupervisorKind,
    /// JaCoCo locations
    pub jacoco: JacocoConfig,
    /// Interval between readiness probes
    pub readiness_poll: Duration,
    /// Wait after a session has been killed
    pub teardown_settle: Duration,
    /// Services and tools
    pub catalog: Catalog,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            specs_dir: PathBuf::from("specs"),
            state_dir: PathBuf::from(".rest-bench"),
            container_runtime: "docker".into(),
            network: Some("host".into()),
            supervisor: SupervisorKind::default(),
            jacoco: JacocoConfig::default(),
            readiness_poll: Duration::from_millis(500),
            teardown_settle: Duration::from_secs(5),
            catalog: Catalog::builtin(),
        }
    }
}

/// On-disk representation; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    results_dir: Option<PathBuf>,
    specs_dir: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    container_runtime: Option<String>,
    network: Option<String>,
    supervisor: Option<SupervisorKind>,
    jacoco: Option<JacocoConfig>,
    readiness_poll_ms: Option<u64>,
    teardown_settle_secs: Option<u64>,
    #[serde(default)]
    services: BTreeMap<String, ServiceSpec>,
    #[serde(default)]
    tools: BTreeMap<String, ToolSpec>,
}

impl HarnessConfig {
    /// Load the defaults, overlaid with `path` when given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            config.apply(Self::parse(&text)?)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text into a config file overlay
    pub fn parse(text: &str) -> Result<ConfigFile, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Overlay a parsed file onto this config; catalog entries are replaced by key
    pub fn apply(&mut self, file: ConfigFile) -> Result<(), ConfigError> {
        if let Some(dir) = file.results_dir {
            self.results_dir = dir;
        }
        if let Some(dir) = file.specs_dir {
            self.specs_dir = dir;
        }
        if let Some(dir) = file.state_dir {
            self.state_dir = dir;
        }
        if let Some(runtime) = file.container_runtime {
            self.container_runtime = runtime;
        }
        if let Some(network) = file.network {
            // An empty string disables the --network flag.
            self.network = (!network.is_empty()).then_some(network);
        }
        if let Some(supervisor) = file.supervisor {
            self.supervisor = supervisor;
        }
        if let Some(jacoco) = file.jacoco {
            self.jacoco = jacoco;
        }
        if let Some(ms) = file.readiness_poll_ms {
            self.readiness_poll = Duration::from_millis(ms);
        }
        if let Some(secs) = file.teardown_settle_secs {
            self.teardown_settle = Duration::from_secs(secs);
        }
        for (name, spec) in file.services {
            let id: ServiceId = name.parse()?;
            self.catalog.services.insert(id, spec);
        }
        for (name, spec) in file.tools {
            let id: ToolId = name.parse()?;
            self.catalog.tools.insert(id, spec);
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.container_runtime.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "container runtime must not be empty".into(),
            ));
        }

        if self.readiness_poll.is_zero() {
            return Err(ConfigError::Invalid(
                "readiness poll interval must be positive".into(),
            ));
        }

        let mut ports: HashMap<u16, ServiceId> = HashMap::new();
        for (id, spec) in &self.catalog.services {
            if spec.base_url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{id}: base_url is empty")));
            }
            let Some(local) = &spec.local else {
                continue;
            };
            if local.port == 0 {
                return Err(ConfigError::Invalid(format!("{id}: port must be non-zero")));
            }
            if local.start_command.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{id}: local service needs a start command"
                )));
            }
            if local.readiness_timeout_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{id}: readiness timeout must be positive"
                )));
            }
            if let Some(first) = ports.insert(local.port, *id) {
                return Err(ConfigError::DuplicatePort {
                    port: local.port,
                    first,
                    second: *id,
                });
            }
        }

        let mut self_terminating = 0;
        for (id, spec) in &self.catalog.tools {
            if spec.image.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{id}: image is empty")));
            }
            if spec.output_mount.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{id}: output mount is empty")));
            }
            if spec.discipline == BudgetDiscipline::SelfTerminating {
                self_terminating += 1;
                if spec.max_duration_secs == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "{id}: max_duration_secs must be positive"
                    )));
                }
            }
        }
        if self_terminating > 1 {
            return Err(ConfigError::Invalid(
                "at most one tool may be self-terminating".into(),
            ));
        }

        Ok(())
    }

    /// `results/<service>/<tool>/`
    pub fn run_dir(&self, service: ServiceId, tool: ToolId) -> PathBuf {
        self.results_dir.join(service.as_str()).join(tool.as_str())
    }

    /// Raw coverage capture written by the agent of `service`
    pub fn coverage_capture(&self, service: ServiceId) -> PathBuf {
        self.state_dir
            .join("jacoco")
            .join(format!("{}.exec", service.as_str()))
    }

    /// Lock file guarding `service`
    pub fn lock_file(&self, service: ServiceId) -> PathBuf {
        self.state_dir
            .join("locks")
            .join(format!("{}.lock", service.as_str()))
    }

    /// Lock file guarding runs of `tool` against `service`
    pub fn run_lock_file(&self, service: ServiceId, tool: ToolId) -> PathBuf {
        self.state_dir
            .join("locks")
            .join("runs")
            .join(format!("{}.{}.lock", service.as_str(), tool.as_str()))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Service name outside the catalog
    #[error("unknown service '{0}' (expected one of: genome-nexus, language-tool, fdic, ohsome, rest-countries)")]
    UnknownService(String),

    /// Tool name outside the catalog
    #[error("unknown tool '{0}' (expected one of: restifai, autoresttest, logiagent)")]
    UnknownTool(String),

    /// Required parameter absent
    #[error("missing required parameter: {0}")]
    Missing(String),

    /// No budget could be resolved for a budget-bound tool
    #[error("no time budget for {tool} on {service}: pass --budget or run the reference tool first")]
    MissingBudget {
        /// Service id
        service: ServiceId,
        /// Tool id
        tool: ToolId,
    },

    /// Two local services share a port
    #[error("port {port} is used by both {first} and {second}")]
    DuplicatePort {
        /// The shared port
        port: u16,
        /// First service
        first: ServiceId,
        /// Second service
        second: ServiceId,
    },

    /// Semantically invalid value
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Config file unreadable
    #[error("failed to read {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.container_runtime, "docker");
        assert_eq!(config.supervisor, SupervisorKind::Tmux);
    }

    #[test]
    fn test_run_dir_layout() {
        let config = HarnessConfig::default();
        assert_eq!(
            config.run_dir(ServiceId::GenomeNexus, ToolId::Restifai),
            PathBuf::from("results/genome-nexus/restifai")
        );
    }

    #[test]
    fn test_overlay_replaces_scalars_and_entries() {
        let text = r#"
            results_dir = "/tmp/out"
            supervisor = "process"
            network = ""
            readiness_poll_ms = 50

            [services.fdic]
            base_url = "http://mirror.local/fdic"
            reference_budget_secs = 10

            [tools.logiagent]
            image = "logiagent:dev"
            discipline = "budget_bound"
            output_mount = "/out"
            args = ["--max-time", "{budget}"]
        "#;

        let mut config = HarnessConfig::default();
        config.apply(HarnessConfig::parse(text).unwrap()).unwrap();

        assert_eq!(config.results_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.supervisor, SupervisorKind::Process);
        assert!(config.network.is_none());
        assert_eq!(config.readiness_poll, Duration::from_millis(50));
        assert_eq!(
            config.catalog.service(ServiceId::Fdic).unwrap().base_url,
            "http://mirror.local/fdic"
        );
        let tool = config.catalog.tool(ToolId::Logiagent).unwrap();
        assert_eq!(tool.image, "logiagent:dev");
        assert_eq!(tool.grace_secs, 120);
        // Untouched entries keep their defaults
        assert!(config.catalog.service(ServiceId::GenomeNexus).unwrap().local.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overlay_rejects_unknown_service_key() {
        let text = r#"
            [services.petstore]
            base_url = "http://localhost:8080"
        "#;
        let mut config = HarnessConfig::default();
        let err = config.apply(HarnessConfig::parse(text).unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownService(name) if name == "petstore"));
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        assert!(matches!(
            HarnessConfig::parse("concurrency = 4"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation_duplicate_port() {
        let mut config = HarnessConfig::default();
        let port = config
            .catalog
            .service(ServiceId::GenomeNexus)
            .unwrap()
            .local
            .as_ref()
            .unwrap()
            .port;
        if let Some(local) = config
            .catalog
            .services
            .get_mut(&ServiceId::LanguageTool)
            .and_then(|s| s.local.as_mut())
        {
            local.port = port;
        }
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicatePort { port: 9002, .. })
        ));
    }

    #[test]
    fn test_validation_zero_ceiling() {
        let mut config = HarnessConfig::default();
        if let Some(tool) = config.catalog.tools.get_mut(&ToolId::Restifai) {
            tool.max_duration_secs = 0;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_two_self_terminating_tools() {
        let mut config = HarnessConfig::default();
        if let Some(tool) = config.catalog.tools.get_mut(&ToolId::Logiagent) {
            tool.discipline = BudgetDiscipline::SelfTerminating;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = HarnessConfig::load(Some(Path::new("/nonexistent/rest-bench.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
