//! Session configuration and provider tables
//!
//! A [`SessionConfig`] is built once per collection and never mutated
//! afterwards: the `with_*` methods consume the value and return a new one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::domain::{ConfigError, Pid};

/// Default size of the runtime's in-memory circular buffer
pub const DEFAULT_BUFFER_SIZE_MB: u32 = 256;

/// Default output file name used by the command line
pub const DEFAULT_OUTPUT: &str = "trace.nettrace";

/// Stack sampling provider
pub const SAMPLE_PROFILER_PROVIDER: &str = "Microsoft-DotNETCore-SampleProfiler";

/// Runtime events provider (GC, JIT, loader, exceptions, threading, ...)
pub const RUNTIME_PROVIDER: &str = "Microsoft-Windows-DotNETRuntime";

/// The runtime provider's "default" keyword group
pub const RUNTIME_DEFAULT_KEYWORDS: u64 = 0x0000_0014_C14F_CCBD;

/// Event verbosity, numerically identical to the runtime's levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    LogAlways = 0,
    Critical = 1,
    Error = 2,
    Warning = 3,
    Informational = 4,
    Verbose = 5,
}

impl EventLevel {
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl FromStr for EventLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "0" | "logalways" => EventLevel::LogAlways,
            "1" | "critical" => EventLevel::Critical,
            "2" | "error" => EventLevel::Error,
            "3" | "warning" => EventLevel::Warning,
            "4" | "informational" => EventLevel::Informational,
            "5" | "verbose" => EventLevel::Verbose,
            _ => return Err(ConfigError::UnknownLevel(s.to_string())),
        };
        Ok(level)
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventLevel::LogAlways => "LogAlways",
            EventLevel::Critical => "Critical",
            EventLevel::Error => "Error",
            EventLevel::Warning => "Warning",
            EventLevel::Informational => "Informational",
            EventLevel::Verbose => "Verbose",
        };
        f.write_str(name)
    }
}

/// A named event source enabled for the duration of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    pub level: EventLevel,
    /// Keyword filter; `None` is sent as an empty mask
    #[serde(default)]
    pub keywords: Option<u64>,
    /// Provider-specific arguments
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
}

impl Provider {
    #[must_use]
    pub fn new(name: impl Into<String>, level: EventLevel) -> Self {
        Self { name: name.into(), level, keywords: None, arguments: BTreeMap::new() }
    }

    #[must_use]
    pub fn with_keywords(mut self, keywords: u64) -> Self {
        self.keywords = Some(keywords);
        self
    }

    #[must_use]
    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Keyword mask as sent on the wire
    #[must_use]
    pub fn keyword_mask(&self) -> u64 {
        self.keywords.unwrap_or(0)
    }

    /// Arguments joined as `key=value;key=value`, or `None` when there are none
    #[must_use]
    pub fn filter_data(&self) -> Option<String> {
        if self.arguments.is_empty() {
            return None;
        }
        let joined: Vec<String> = self.arguments.iter().map(|(k, v)| format!("{k}={v}")).collect();
        Some(joined.join(";"))
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    /// Parse `Name[:Keywords[:Level[:key=value;key=value]]]`
    ///
    /// Keywords are hexadecimal (`0x` optional). Level is a number or a name
    /// and defaults to `Verbose`. Empty fields take their defaults.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidProviderSpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = spec.trim().splitn(4, ':');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(invalid("provider name is empty"));
        }
        let mut provider = Provider::new(name, EventLevel::Verbose);

        if let Some(keywords) = parts.next().map(str::trim).filter(|k| !k.is_empty()) {
            let digits = keywords.trim_start_matches("0x").trim_start_matches("0X");
            let mask = u64::from_str_radix(digits, 16)
                .map_err(|_| invalid("keywords must be a hexadecimal mask"))?;
            provider.keywords = Some(mask);
        }

        if let Some(level) = parts.next().map(str::trim).filter(|l| !l.is_empty()) {
            provider.level = level.parse()?;
        }

        if let Some(args) = parts.next() {
            for pair in args.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                let (key, value) =
                    pair.split_once('=').ok_or_else(|| invalid("arguments must be key=value"))?;
                provider.arguments.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        Ok(provider)
    }
}

/// Parse a comma separated list of provider specs
///
/// # Errors
/// Returns an error if any entry is malformed
pub fn parse_provider_list(list: &str) -> Result<Vec<Provider>, ConfigError> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::parse::<Provider>).collect()
}

/// Load providers from a JSON file holding an array of provider objects
///
/// # Errors
/// Returns an error if the file cannot be read or does not deserialize
pub fn load_providers_file(path: &Path) -> Result<Vec<Provider>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| {
        ConfigError::ProvidersFileUnreadable { path: path.to_path_buf(), source }
    })?;
    serde_json::from_str(&content)
        .map_err(|source| ConfigError::ProvidersFileInvalid { path: path.to_path_buf(), source })
}

/// CPU sampling plus the runtime's default keywords
#[must_use]
pub fn default_providers() -> Vec<Provider> {
    vec![
        Provider::new(SAMPLE_PROFILER_PROVIDER, EventLevel::Informational),
        Provider::new(RUNTIME_PROVIDER, EventLevel::Informational)
            .with_keywords(RUNTIME_DEFAULT_KEYWORDS),
    ]
}

/// Immutable parameters of one collection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pid: Option<Pid>,
    circular_buffer_mb: u32,
    providers: Vec<Provider>,
    request_rundown: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pid: None,
            circular_buffer_mb: DEFAULT_BUFFER_SIZE_MB,
            providers: default_providers(),
            request_rundown: true,
        }
    }
}

impl SessionConfig {
    /// Create a configuration
    ///
    /// `pid` of `None` traces the calling process; `providers` of `None`
    /// enables [`default_providers`].
    ///
    /// # Errors
    /// Returns an error for a zero buffer size or an empty provider list
    pub fn new(
        pid: Option<Pid>,
        circular_buffer_mb: u32,
        providers: Option<Vec<Provider>>,
    ) -> Result<Self, ConfigError> {
        Self::default()
            .with_pid(pid)
            .with_buffer_size_mb(circular_buffer_mb)?
            .with_providers(providers.unwrap_or_else(default_providers))
    }

    #[must_use]
    pub fn with_pid(self, pid: Option<Pid>) -> Self {
        Self { pid, ..self }
    }

    /// # Errors
    /// Returns [`ConfigError::ZeroBufferSize`] for `0`
    pub fn with_buffer_size_mb(self, circular_buffer_mb: u32) -> Result<Self, ConfigError> {
        if circular_buffer_mb == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        Ok(Self { circular_buffer_mb, ..self })
    }

    /// # Errors
    /// Returns [`ConfigError::NoProviders`] for an empty list
    pub fn with_providers(self, providers: Vec<Provider>) -> Result<Self, ConfigError> {
        if providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }
        Ok(Self { providers, ..self })
    }

    #[must_use]
    pub fn with_rundown(self, request_rundown: bool) -> Self {
        Self { request_rundown, ..self }
    }

    /// Explicitly configured pid, if any
    #[must_use]
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// The process to trace: the configured pid or the calling process
    #[must_use]
    pub fn target_pid(&self) -> Pid {
        self.pid.unwrap_or_else(Pid::current)
    }

    #[must_use]
    pub fn circular_buffer_mb(&self) -> u32 {
        self.circular_buffer_mb
    }

    #[must_use]
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    #[must_use]
    pub fn request_rundown(&self) -> bool {
        self.request_rundown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.circular_buffer_mb(), 256);
        assert_eq!(config.target_pid(), Pid::current());
        assert!(config.request_rundown());

        let providers = config.providers();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].name, SAMPLE_PROFILER_PROVIDER);
        assert_eq!(providers[0].keyword_mask(), 0);
        assert_eq!(providers[1].name, RUNTIME_PROVIDER);
        assert_eq!(providers[1].level, EventLevel::Informational);
        assert_eq!(providers[1].keyword_mask(), RUNTIME_DEFAULT_KEYWORDS);
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(matches!(SessionConfig::new(None, 0, None), Err(ConfigError::ZeroBufferSize)));
        assert!(matches!(
            SessionConfig::new(Some(Pid(1)), 64, Some(Vec::new())),
            Err(ConfigError::NoProviders)
        ));
        let config = SessionConfig::new(Some(Pid(42)), 64, None).unwrap();
        assert_eq!(config.target_pid(), Pid(42));
        assert_eq!(config.circular_buffer_mb(), 64);
    }

    #[test]
    fn test_parse_provider_spec() {
        let provider: Provider = "My-Provider:0x1F:Warning:a=1;b=two".parse().unwrap();
        assert_eq!(provider.name, "My-Provider");
        assert_eq!(provider.keywords, Some(0x1F));
        assert_eq!(provider.level, EventLevel::Warning);
        assert_eq!(provider.filter_data().as_deref(), Some("a=1;b=two"));

        let provider: Provider = "Only-Name".parse().unwrap();
        assert_eq!(provider.level, EventLevel::Verbose);
        assert_eq!(provider.keywords, None);
        assert_eq!(provider.filter_data(), None);

        let provider: Provider = "Skip-Keywords::4".parse().unwrap();
        assert_eq!(provider.keywords, None);
        assert_eq!(provider.level, EventLevel::Informational);
    }

    #[test]
    fn test_parse_provider_spec_errors() {
        assert!("".parse::<Provider>().is_err());
        assert!("P:zz".parse::<Provider>().is_err());
        assert!(matches!("P:1:loud".parse::<Provider>(), Err(ConfigError::UnknownLevel(_))));
        assert!("P:1:4:novalue".parse::<Provider>().is_err());
    }

    #[test]
    fn test_parse_provider_list() {
        let providers = parse_provider_list("A:1:4, B ,").unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[1].name, "B");
    }

    #[test]
    fn test_load_providers_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.json");
        std::fs::write(
            &path,
            r#"[
                {"name": "Microsoft-DotNETCore-SampleProfiler", "level": "informational"},
                {"name": "Custom", "level": "verbose", "keywords": 255, "arguments": {"k": "v"}}
            ]"#,
        )
        .unwrap();

        let providers = load_providers_file(&path).unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[1].keywords, Some(255));
        assert_eq!(providers[1].filter_data().as_deref(), Some("k=v"));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            load_providers_file(&path),
            Err(ConfigError::ProvidersFileInvalid { .. })
        ));
    }
}
