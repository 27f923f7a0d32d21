use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::tokenization::LeadingMarker;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "LOOKAHEAD_CONFIG";
/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "lookahead.toml";

pub const DEFAULT_INSTRUCTION: &str = "Rewrite this document to be more concise.";

/// Service defaults and request limits.
///
/// Every field is optional in TOML; missing fields take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// GGUF file loaded by `InferenceService::init_from_gguf` when no path
    /// is given explicitly.
    pub model_path: Option<PathBuf>,
    pub default_instruction: String,
    /// Branches returned by next-token and continuation requests.
    pub branch_width: usize,
    /// Alternatives listed per highlighted token.
    pub highlight_top_k: usize,
    pub n_future_tokens: usize,
    pub max_branch_width: usize,
    pub max_future_tokens: usize,
    pub leading_marker: LeadingMarker,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            model_path: None,
            default_instruction: DEFAULT_INSTRUCTION.to_string(),
            branch_width: 5,
            highlight_top_k: 5,
            n_future_tokens: 5,
            max_branch_width: 64,
            max_future_tokens: 256,
            leading_marker: LeadingMarker::default(),
        }
    }
}

impl EngineConfig {
    /// `$LOOKAHEAD_CONFIG` if set, else `./lookahead.toml` if it exists,
    /// else the defaults.
    pub fn load() -> Result<EngineConfig> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::from_file(local);
        }
        debug!("no config file, using defaults");
        Ok(EngineConfig::default())
    }

    pub fn from_file(path: &Path) -> Result<EngineConfig> {
        let raw = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&raw)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<EngineConfig> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_branch_width == 0 {
            return Err(EngineError::Config("max_branch_width must be at least 1".into()));
        }
        let as_config = |e: EngineError| match e {
            EngineError::InvalidArgument(msg) => EngineError::Config(msg),
            other => other,
        };
        self.check_branch_width(self.branch_width).map_err(as_config)?;
        self.check_branch_width(self.highlight_top_k).map_err(as_config)?;
        self.check_future_tokens(self.n_future_tokens).map_err(as_config)?;
        Ok(())
    }

    /// A request's branch width: at least 1 and within `max_branch_width`.
    pub fn check_branch_width(&self, k: usize) -> Result<usize> {
        if k == 0 || k > self.max_branch_width {
            return Err(EngineError::InvalidArgument(format!(
                "branch width {} outside 1..={}",
                k, self.max_branch_width
            )));
        }
        Ok(k)
    }

    pub fn check_future_tokens(&self, n: usize) -> Result<usize> {
        if n > self.max_future_tokens {
            return Err(EngineError::InvalidArgument(format!(
                "{} future tokens exceeds the limit of {}",
                n, self.max_future_tokens
            )));
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.branch_width, 5);
        assert_eq!(c.default_instruction, DEFAULT_INSTRUCTION);
        assert_eq!(c.leading_marker, LeadingMarker::StripFirst);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c = EngineConfig::from_toml_str(
            "branch_width = 3\nleading_marker = { strip_if_present = 2 }\n",
        )
        .unwrap();
        assert_eq!(c.branch_width, 3);
        assert_eq!(c.highlight_top_k, 5);
        assert_eq!(c.leading_marker, LeadingMarker::StripIfPresent(2));
    }

    #[test]
    fn test_rejects_out_of_range_widths() {
        assert!(matches!(
            EngineConfig::from_toml_str("branch_width = 0"),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("max_branch_width = 4\nbranch_width = 5"),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("max_future_tokens = 2"),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_validate_checks_every_width() {
        let ok = EngineConfig {
            branch_width: 64,
            highlight_top_k: 1,
            n_future_tokens: 256,
            ..EngineConfig::default()
        };
        assert!(ok.validate().is_ok());

        let bad_top_k = EngineConfig {
            highlight_top_k: 65,
            ..EngineConfig::default()
        };
        assert!(matches!(bad_top_k.validate(), Err(EngineError::Config(m)) if m.contains("65")));

        let bad_future = EngineConfig {
            n_future_tokens: 300,
            ..EngineConfig::default()
        };
        assert!(matches!(bad_future.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_unparseable_toml() {
        assert!(matches!(
            EngineConfig::from_toml_str("branch_width = \"wide\""),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model_path = \"/models/tiny.gguf\"").unwrap();
        writeln!(file, "n_future_tokens = 8").unwrap();
        let c = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(c.model_path, Some(PathBuf::from("/models/tiny.gguf")));
        assert_eq!(c.n_future_tokens, 8);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_request_limits() {
        let c = EngineConfig::default();
        assert_eq!(c.check_branch_width(64).unwrap(), 64);
        assert!(c.check_branch_width(65).is_err());
        assert!(c.check_future_tokens(0).is_ok());
        assert!(c.check_future_tokens(257).is_err());
    }
}
