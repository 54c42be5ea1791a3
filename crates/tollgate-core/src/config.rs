use crate::decision::RiskLevel;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3377
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// DispatcherConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

fn default_max_response_bytes() -> usize {
    100 * 1024
}

fn default_protocol_version() -> String {
    "2024-11-05".to_string()
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_response_bytes: default_max_response_bytes(),
            protocol_version: default_protocol_version(),
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimitConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    /// Guards the HTTP boundary, keyed by API key or peer address.
    #[serde(default = "default_transport_limit")]
    pub transport: RateLimitConfig,
    /// Applied after authentication, keyed by API key.
    #[serde(default = "default_api_key_limit")]
    pub api_key: RateLimitConfig,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_transport_limit() -> RateLimitConfig {
    RateLimitConfig {
        limit: 100,
        window_ms: 60_000,
    }
}

fn default_api_key_limit() -> RateLimitConfig {
    RateLimitConfig {
        limit: 1_000,
        window_ms: 60_000,
    }
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            transport: default_transport_limit(),
            api_key: default_api_key_limit(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// BreakerConfig
// ---------------------------------------------------------------------------

/// How a closed breaker counts failures toward its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailureCounting {
    /// Any success clears the count.
    Consecutive,
    /// Failures older than `window_ms` stop counting; successes do not clear.
    Rolling { window_ms: u64 },
}

impl Default for FailureCounting {
    fn default() -> Self {
        FailureCounting::Rolling { window_ms: 60_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default)]
    pub counting: FailureCounting,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            counting: FailureCounting::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakersConfig {
    #[serde(default)]
    pub default: BreakerConfig,
    /// Per-breaker settings keyed by composite name, e.g. `orchestrator:judgment`.
    #[serde(default)]
    pub overrides: HashMap<String, BreakerConfig>,
}

impl BreakersConfig {
    pub fn for_name(&self, name: &str) -> &BreakerConfig {
        self.overrides.get(name).unwrap_or(&self.default)
    }
}

// ---------------------------------------------------------------------------
// OrchestratorConfig
// ---------------------------------------------------------------------------

/// What to do when judgment was required but could not be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Keep the matrix decision as if judgment had not been requested.
    Permissive,
    /// Block the call.
    Restrictive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgmentFallback {
    #[serde(default = "default_fallback")]
    pub default: FallbackPolicy,
    #[serde(default = "default_critical_fallback")]
    pub critical: FallbackPolicy,
}

fn default_fallback() -> FallbackPolicy {
    FallbackPolicy::Permissive
}

fn default_critical_fallback() -> FallbackPolicy {
    FallbackPolicy::Restrictive
}

impl Default for JudgmentFallback {
    fn default() -> Self {
        Self {
            default: default_fallback(),
            critical: default_critical_fallback(),
        }
    }
}

impl JudgmentFallback {
    pub fn for_risk(&self, risk: RiskLevel) -> FallbackPolicy {
        if risk == RiskLevel::Critical {
            self.critical
        } else {
            self.default
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Four ascending cut points splitting [0, 1] into five trust levels.
    #[serde(default = "default_trust_breakpoints")]
    pub trust_breakpoints: [f64; 4],
    #[serde(default = "default_trust")]
    pub default_trust: f64,
    #[serde(default)]
    pub judgment_fallback: JudgmentFallback,
    #[serde(default = "default_judge_risk")]
    pub judge_risk_at_or_above: RiskLevel,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

fn default_trust_breakpoints() -> [f64; 4] {
    [0.2, 0.4, 0.6, 0.8]
}

fn default_trust() -> f64 {
    0.5
}

fn default_judge_risk() -> RiskLevel {
    RiskLevel::High
}

fn default_excerpt_chars() -> usize {
    200
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            trust_breakpoints: default_trust_breakpoints(),
            default_trust: default_trust(),
            judgment_fallback: JudgmentFallback::default(),
            judge_risk_at_or_above: default_judge_risk(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConsensusConfig / TracerConfig / TrustConfig / SecurityConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_approval_threshold")]
    pub approval_threshold: f64,
    #[serde(default = "default_veto_threshold")]
    pub veto_threshold: f64,
    #[serde(default = "default_vote_timeout_ms")]
    pub vote_timeout_ms: u64,
}

fn default_approval_threshold() -> f64 {
    0.618
}

fn default_veto_threshold() -> f64 {
    0.382
}

fn default_vote_timeout_ms() -> u64 {
    3_000
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            approval_threshold: default_approval_threshold(),
            veto_threshold: default_veto_threshold(),
            vote_timeout_ms: default_vote_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerConfig {
    #[serde(default = "default_tracer_capacity")]
    pub capacity: usize,
}

fn default_tracer_capacity() -> usize {
    500
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            capacity: default_tracer_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustConfig {
    /// redb file for persistent trust scores. In-memory when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Accepted API keys. Empty disables key authentication.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub rate_limit: RateLimitsConfig,
    #[serde(default)]
    pub breakers: BreakersConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub tracer: TracerConfig,
    #[serde(default)]
    pub trust: TrustConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file absent, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data)
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        // 1. Trust breakpoints must split [0, 1] in strictly ascending order
        let bp = &self.orchestrator.trust_breakpoints;
        if bp.windows(2).any(|w| w[0] >= w[1]) {
            error(format!(
                "orchestrator.trust_breakpoints must be strictly ascending, got {bp:?}"
            ));
        }
        if bp.iter().any(|b| !(0.0..=1.0).contains(b)) {
            error("orchestrator.trust_breakpoints must lie within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.orchestrator.default_trust) {
            error(format!(
                "orchestrator.default_trust={} is outside [0, 1]",
                self.orchestrator.default_trust
            ));
        }

        // 2. Consensus thresholds
        let c = &self.consensus;
        if !(c.approval_threshold > 0.0 && c.approval_threshold <= 1.0) {
            error(format!(
                "consensus.approval_threshold={} must be in (0, 1]",
                c.approval_threshold
            ));
        }
        if !(c.veto_threshold > 0.0 && c.veto_threshold <= 1.0) {
            error(format!(
                "consensus.veto_threshold={} must be in (0, 1]",
                c.veto_threshold
            ));
        }

        // 3. Rate limits and capacities
        for (label, rl) in [
            ("rate_limit.transport", &self.rate_limit.transport),
            ("rate_limit.api_key", &self.rate_limit.api_key),
        ] {
            if rl.limit == 0 || rl.window_ms == 0 {
                error(format!("{label} must have a non-zero limit and window_ms"));
            }
        }
        if self.tracer.capacity == 0 {
            error("tracer.capacity must be at least 1".to_string());
        }
        if self.dispatcher.max_response_bytes < 1024 {
            error(format!(
                "dispatcher.max_response_bytes={} is too small (minimum 1024)",
                self.dispatcher.max_response_bytes
            ));
        }

        // 4. Breakers
        let breakers = std::iter::once(("breakers.default".to_string(), &self.breakers.default))
            .chain(
                self.breakers
                    .overrides
                    .iter()
                    .map(|(name, b)| (format!("breakers.overrides.{name}"), b)),
            );
        for (label, b) in breakers {
            if b.failure_threshold == 0 {
                error(format!("{label}.failure_threshold must be at least 1"));
            }
            if b.call_timeout_ms == 0 {
                error(format!("{label}.call_timeout_ms must be non-zero"));
            }
        }

        // 5. Soft warnings
        if c.veto_threshold >= c.approval_threshold {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "consensus.veto_threshold={} is not below approval_threshold={}; \
                     approval will rarely be reachable",
                    c.veto_threshold, c.approval_threshold
                ),
            });
        }
        if self.orchestrator.judgment_fallback.critical == FallbackPolicy::Permissive {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "judgment_fallback.critical is permissive: critical-risk calls \
                          proceed when judgment is unavailable"
                    .to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
