use std::env;

pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-haiku-20240307-v1:0";
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedChunkPolicy {
    #[default]
    Abort,
    Skip,
}

impl MalformedChunkPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationConfig {
    pub model_id: String,
    pub max_tokens: u32,
    pub anthropic_version: String,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop_sequences: Vec<String>,
    pub malformed_chunk_policy: MalformedChunkPolicy,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            anthropic_version: DEFAULT_ANTHROPIC_VERSION.to_string(),
            system: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: Vec::new(),
            malformed_chunk_policy: MalformedChunkPolicy::default(),
        }
    }
}

impl InvocationConfig {
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub region: String,
    pub endpoint_url: String,
    pub model_timeout_secs: u64,
    pub bearer_token: Option<String>,
    pub invocation: InvocationConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_env_with(|key| env::var(key).ok())
    }

    fn from_env_with(mut get_var: impl FnMut(&str) -> Option<String>) -> Self {
        let region = non_empty(get_var("AWS_REGION")).unwrap_or_else(|| DEFAULT_REGION.to_string());
        let endpoint_url =
            non_empty(get_var("BEDROCK_ENDPOINT_URL")).unwrap_or_else(|| default_endpoint(&region));
        let model_timeout_secs = parse_model_timeout_secs(get_var("MODEL_TIMEOUT_SECS").as_deref());

        let invocation = InvocationConfig {
            model_id: non_empty(get_var("BEDROCK_MODEL_ID"))
                .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            max_tokens: parse_max_tokens(get_var("MAX_TOKENS").as_deref()),
            anthropic_version: non_empty(get_var("ANTHROPIC_VERSION"))
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_VERSION.to_string()),
            system: non_empty(get_var("SYSTEM_PROMPT")),
            temperature: parse_unit_interval(get_var("TEMPERATURE").as_deref()),
            top_p: parse_unit_interval(get_var("TOP_P").as_deref()),
            top_k: get_var("TOP_K").and_then(|value| value.trim().parse::<u32>().ok()),
            stop_sequences: Vec::new(),
            malformed_chunk_policy: parse_malformed_chunk_policy(
                get_var("MALFORMED_CHUNK_POLICY").as_deref(),
            ),
        };

        Self {
            region,
            endpoint_url,
            model_timeout_secs,
            bearer_token: non_empty(get_var("AWS_BEARER_TOKEN_BEDROCK")),
            invocation,
        }
    }
}

fn default_endpoint(region: &str) -> String {
    format!("https://bedrock-runtime.{region}.amazonaws.com")
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_positive_u64(raw: Option<&str>, default: u64) -> u64 {
    raw.and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn parse_model_timeout_secs(raw: Option<&str>) -> u64 {
    parse_positive_u64(raw, DEFAULT_MODEL_TIMEOUT_SECS)
}

fn parse_max_tokens(raw: Option<&str>) -> u32 {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_TOKENS)
}

fn parse_unit_interval(raw: Option<&str>) -> Option<f32> {
    raw.and_then(|value| value.trim().parse::<f32>().ok())
        .filter(|value| (0.0..=1.0).contains(value))
}

fn parse_malformed_chunk_policy(raw: Option<&str>) -> MalformedChunkPolicy {
    match raw.unwrap_or("abort").trim().to_ascii_lowercase().as_str() {
        "skip" => MalformedChunkPolicy::Skip,
        _ => MalformedChunkPolicy::Abort,
    }
}
