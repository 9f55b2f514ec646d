//! Service and tool catalog
//!
//! The harness compares a closed set of tools against a closed set of
//! services. Identifiers are enums so an unknown name is rejected while
//! parsing arguments, before any service is touched. The per-identifier
//! details (URLs, ports, images, argument templates) are plain data and
//! can be overridden from the configuration file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::lifecycle::ReadinessProbe;

// ============================================================================
// Identifiers
// ============================================================================

/// Target service identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceId {
    /// Genome Nexus annotation service (local, backed by MongoDB)
    GenomeNexus,
    /// LanguageTool proofreading service (local)
    LanguageTool,
    /// FDIC bank data API (remote)
    Fdic,
    /// ohsome OpenStreetMap history API (remote)
    Ohsome,
    /// REST Countries API (remote)
    RestCountries,
}

impl ServiceId {
    /// All known services, in catalog order
    pub const ALL: [ServiceId; 5] = [
        ServiceId::GenomeNexus,
        ServiceId::LanguageTool,
        ServiceId::Fdic,
        ServiceId::Ohsome,
        ServiceId::RestCountries,
    ];

    /// Directory and session name for this service
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceId::GenomeNexus => "genome-nexus",
            ServiceId::LanguageTool => "language-tool",
            ServiceId::Fdic => "fdic",
            ServiceId::Ohsome => "ohsome",
            ServiceId::RestCountries => "rest-countries",
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownService(s.to_string()))
    }
}

/// Testing tool identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolId {
    /// RESTifAI: LLM-driven, runs until every operation has been attempted
    Restifai,
    /// AutoRestTest: multi-agent reinforcement learning, time-boxed
    Autoresttest,
    /// LogiAgent: LLM scenario agent, time-boxed
    Logiagent,
}

impl ToolId {
    /// All known tools, in catalog order
    pub const ALL: [ToolId; 3] = [ToolId::Restifai, ToolId::Autoresttest, ToolId::Logiagent];

    /// Directory name for this tool
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolId::Restifai => "restifai",
            ToolId::Autoresttest => "autoresttest",
            ToolId::Logiagent => "logiagent",
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownTool(s.to_string()))
    }
}

// ============================================================================
// Services
// ============================================================================

/// Whether the harness owns the service process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// Started and stopped by the harness, instrumented for coverage
    Local,
    /// Externally hosted, only reachable over HTTP
    Remote,
}

/// Static description of a target service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Base URL handed to the tools
    pub base_url: String,

    /// Process details, present only for local services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalService>,

    /// Fallback budget for budget-bound tools when no measured reference exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_budget_secs: Option<u64>,

    /// OpenAPI file name inside the specs directory (defaults to `<service>.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_file: Option<String>,
}

impl ServiceSpec {
    /// Local or remote
    pub fn kind(&self) -> ServiceKind {
        if self.local.is_some() {
            ServiceKind::Local
        } else {
            ServiceKind::Remote
        }
    }

    /// Spec file name for the given service
    pub fn spec_file_name(&self, id: ServiceId) -> String {
        self.spec_file
            .clone()
            .unwrap_or_else(|| format!("{}.json", id.as_str()))
    }
}

/// Process details of a locally hosted service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalService {
    /// Fixed listening port
    pub port: u16,

    /// Shell command starting the service; `{agent}` expands to the coverage
    /// agent option and `{port}` to the listening port
    pub start_command: String,

    /// Optional command run after the session has been terminated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_command: Option<String>,

    /// Compiled classes matched against the coverage capture
    pub classfiles: PathBuf,

    /// Data store the service needs, managed outside the service session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<AuxiliaryStore>,

    /// How readiness is detected
    #[serde(default)]
    pub readiness: ReadinessProbe,

    /// Upper bound on the readiness wait
    #[serde(default = "default_readiness_timeout_secs")]
    pub readiness_timeout_secs: u64,
}

fn default_readiness_timeout_secs() -> u64 {
    120
}

/// Auxiliary process (e.g. a database) started before and stopped after the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuxiliaryStore {
    /// Display name used in logs
    pub name: String,
    /// Command bringing the store up
    pub start_command: String,
    /// Command bringing the store down
    pub stop_command: String,
}

// ============================================================================
// Tools
// ============================================================================

/// How a tool decides when to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetDiscipline {
    /// Runs until every input operation has been attempted, then reports elapsed time
    SelfTerminating,
    /// Accepts a time budget and stops at or shortly after it
    BudgetBound,
}

/// Static description of a testing tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Container image
    pub image: String,

    /// Time-budget discipline
    pub discipline: BudgetDiscipline,

    /// Path inside the container where the tool writes its result artifact
    pub output_mount: String,

    /// Arguments after the image; `{base_url}`, `{service}`, `{spec}`,
    /// `{budget}` and `{output}` are expanded per run
    pub args: Vec<String>,

    /// Host environment variables forwarded to the container
    #[serde(default)]
    pub env: Vec<String>,

    /// Extra seconds a budget-bound tool gets past its budget before it is killed
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Hard ceiling for a self-terminating tool
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
}

fn default_grace_secs() -> u64 {
    120
}

fn default_max_duration_secs() -> u64 {
    6 * 60 * 60
}

// ============================================================================
// Catalog
// ============================================================================

/// The full set of services and tools
#[derive(Debug, Clone)]
pub struct Catalog {
    /// Services keyed by id
    pub services: BTreeMap<ServiceId, ServiceSpec>,
    /// Tools keyed by id
    pub tools: BTreeMap<ToolId, ToolSpec>,
}

impl Catalog {
    /// Look up a service
    pub fn service(&self, id: ServiceId) -> Result<&ServiceSpec, ConfigError> {
        self.services
            .get(&id)
            .ok_or_else(|| ConfigError::UnknownService(id.to_string()))
    }

    /// Look up a tool
    pub fn tool(&self, id: ToolId) -> Result<&ToolSpec, ConfigError> {
        self.tools
            .get(&id)
            .ok_or_else(|| ConfigError::UnknownTool(id.to_string()))
    }

    /// The tool whose measured duration is the reference budget, if any
    pub fn reference_tool(&self) -> Option<ToolId> {
        self.tools
            .iter()
            .find(|(_, spec)| spec.discipline == BudgetDiscipline::SelfTerminating)
            .map(|(id, _)| *id)
    }

    /// Built-in catalog
    pub fn builtin() -> Self {
        let mut services = BTreeMap::new();

        services.insert(
            ServiceId::GenomeNexus,
            ServiceSpec {
                base_url: "http://localhost:9002".into(),
                local: Some(LocalService {
                    port: 9002,
                    start_command: "java {agent} -jar services/genome-nexus/genome-nexus-sut.jar \
                                    --server.port={port} \
                                    --spring.data.mongodb.uri=mongodb://localhost:27017/annotator"
                        .into(),
                    stop_command: None,
                    classfiles: PathBuf::from("services/genome-nexus/classes"),
                    auxiliary: Some(AuxiliaryStore {
                        name: "mongodb".into(),
                        start_command: "docker run -d --rm --name rest-bench-mongo \
                                        -p 27017:27017 mongo:3.6.2"
                            .into(),
                        stop_command: "docker stop rest-bench-mongo".into(),
                    }),
                    readiness: ReadinessProbe::default(),
                    readiness_timeout_secs: 180,
                }),
                reference_budget_secs: Some(1069),
                spec_file: None,
            },
        );

        services.insert(
            ServiceId::LanguageTool,
            ServiceSpec {
                base_url: "http://localhost:9003/v2".into(),
                local: Some(LocalService {
                    port: 9003,
                    start_command: "java {agent} -jar services/language-tool/languagetool-sut.jar \
                                    --port {port} --public --allow-origin '*'"
                        .into(),
                    stop_command: None,
                    classfiles: PathBuf::from("services/language-tool/classes"),
                    auxiliary: None,
                    readiness: ReadinessProbe::default(),
                    readiness_timeout_secs: default_readiness_timeout_secs(),
                }),
                reference_budget_secs: Some(74),
                spec_file: None,
            },
        );

        for (id, url, budget) in [
            (ServiceId::Fdic, "https://banks.data.fdic.gov/api", 521),
            (ServiceId::Ohsome, "https://api.ohsome.org/v1", 10456),
            (ServiceId::RestCountries, "https://restcountries.com", 349),
        ] {
            services.insert(
                id,
                ServiceSpec {
                    base_url: url.into(),
                    local: None,
                    reference_budget_secs: Some(budget),
                    spec_file: None,
                },
            );
        }

        let llm_env = vec![
            "OPENAI_API_KEY".to_string(),
            "OPENAI_MODEL_NAME".to_string(),
            "AZURE_OPENAI_API_KEY".to_string(),
            "AZURE_OPENAI_ENDPOINT".to_string(),
            "AZURE_OPENAI_API_VERSION".to_string(),
            "AZURE_OPENAI_DEPLOYMENT".to_string(),
        ];

        let mut tools = BTreeMap::new();

        tools.insert(
            ToolId::Restifai,
            ToolSpec {
                image: "restifai:latest".into(),
                discipline: BudgetDiscipline::SelfTerminating,
                output_mount: "/app/output".into(),
                args: vec![
                    "python".into(),
                    "src/cli_scripts/generate_tests.py".into(),
                    "--base-url".into(),
                    "{base_url}".into(),
                    "--spec-path".into(),
                    "{spec}".into(),
                ],
                env: llm_env.clone(),
                grace_secs: default_grace_secs(),
                max_duration_secs: default_max_duration_secs(),
            },
        );

        tools.insert(
            ToolId::Autoresttest,
            ToolSpec {
                image: "autoresttest:latest".into(),
                discipline: BudgetDiscipline::BudgetBound,
                output_mount: "/app/data".into(),
                args: vec![
                    "python".into(),
                    "AutoRestTest.py".into(),
                    "-s".into(),
                    "{service}".into(),
                    "-t".into(),
                    "{budget}".into(),
                ],
                env: vec!["OPENAI_API_KEY".into()],
                grace_secs: default_grace_secs(),
                max_duration_secs: default_max_duration_secs(),
            },
        );

        tools.insert(
            ToolId::Logiagent,
            ToolSpec {
                image: "logiagent:latest".into(),
                discipline: BudgetDiscipline::BudgetBound,
                output_mount: "/app/logs".into(),
                args: vec![
                    "python".into(),
                    "logi_agent.py".into(),
                    "--system-name".into(),
                    "{service}".into(),
                    "--base-url".into(),
                    "{base_url}".into(),
                    "--openapi-json".into(),
                    "{spec}".into(),
                    "--max-time".into(),
                    "{budget}".into(),
                    "--log-path".into(),
                    "{output}".into(),
                ],
                env: llm_env,
                grace_secs: default_grace_secs(),
                max_duration_secs: default_max_duration_secs(),
            },
        );

        Self { services, tools }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}
