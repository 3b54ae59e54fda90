use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Applied to writes that omit the `rp` query parameter.
    #[serde(default)]
    pub default_retention_policy: String,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub upstream: Vec<UpstreamConfig>,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub udf: UdfConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Shared secret for HMAC-SHA512 bearer tokens.
    #[serde(default)]
    pub shared_secret: String,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub name: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub default: bool,
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SlackConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub channel: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SmtpConfig {
    #[serde(default)]
    pub enabled: bool,
    /// HTTP relay endpoint; SMTP itself is delegated to the relay.
    #[serde(default)]
    pub gateway_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub from: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UdfConfig {
    #[serde(default)]
    pub functions: BTreeMap<String, UdfFunctionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UdfFunctionConfig {
    #[serde(default)]
    pub prog: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub socket: Option<String>,
    #[serde(default = "default_udf_timeout_secs")]
    pub timeout_secs: u64,
    /// Declared edge kinds, checked at compile time and verified against
    /// the process's own Info response at enable.
    #[serde(default = "default_edge_kind")]
    pub wants: String,
    #[serde(default = "default_edge_kind")]
    pub provides: String,
}

fn default_http_port() -> u16 {
    9092
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_query_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_upstream_timeout_secs() -> u64 {
    5
}

fn default_udf_timeout_secs() -> u64 {
    10
}

fn default_edge_kind() -> String {
    "stream".to_string()
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Compile-time UDF signatures from the declared edge kinds.
    pub fn udf_compile_env(&self) -> weir_dsl::CompileEnv {
        use weir_dsl::EdgeKind;
        let mut env = weir_dsl::CompileEnv::default();
        for (name, f) in &self.udf.functions {
            let wants = if f.wants == "batch" {
                EdgeKind::Batch
            } else {
                EdgeKind::Stream
            };
            let provides = if f.provides == "batch" {
                EdgeKind::Batch
            } else {
                EdgeKind::Stream
            };
            env.udf.insert(name.clone(), (wants, provides));
        }
        env
    }

    pub fn udf_specs(&self) -> BTreeMap<String, weir_udf::UdfSpec> {
        self.udf
            .functions
            .iter()
            .map(|(name, f)| {
                (
                    name.clone(),
                    weir_udf::UdfSpec {
                        name: name.clone(),
                        prog: f.prog.clone(),
                        args: f.args.clone(),
                        env: f.env.clone(),
                        socket: f.socket.clone(),
                        timeout: std::time::Duration::from_secs(f.timeout_secs),
                    },
                )
            })
            .collect()
    }
}
