//! Config file loading for CLI defaults.
//!
//! Precedence is built-in defaults, then the config file, then CLI flags.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use pmcfetch_core::config::{MAX_CONCURRENCY, MIN_CONCURRENCY};
use pmcfetch_core::{AmbiguousDefault, Config, SourcePreference};

/// TOML-subset file configuration for pmcfetch defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileConfig {
    /// Directory for downloaded PDFs.
    pub output_dir: Option<PathBuf>,
    /// Directory for the cache.
    pub cache_dir: Option<PathBuf>,
    /// Default concurrency (same range as CLI).
    pub concurrency: Option<u8>,
    /// Courtesy pause before each download, in seconds.
    pub delay_seconds: Option<f64>,
    /// Lifetime of cached resolutions, in seconds.
    pub cache_ttl_seconds: Option<u64>,
    /// Contact address sent to lookup services.
    pub email: Option<String>,
    /// NCBI API key.
    pub api_key: Option<String>,
    /// PMID lookup service selection.
    pub source: Option<SourcePreference>,
    /// Reading of bare numbers.
    pub ambiguous_default: Option<AmbiguousDefault>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&usize::from(concurrency))
        {
            bail!(
                "Invalid config value for `concurrency`: {concurrency}. Expected range: {MIN_CONCURRENCY}..={MAX_CONCURRENCY}"
            );
        }
        if let Some(delay) = self.delay_seconds
            && !(delay.is_finite() && delay >= 0.0)
        {
            bail!("Invalid config value for `delay_seconds`: {delay}. Expected a number >= 0");
        }
        Ok(())
    }

    /// Overwrites the fields of `config` that this file sets.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir.clone_from(dir);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = usize::from(concurrency);
        }
        if let Some(delay) = self.delay_seconds {
            config.delay_seconds = delay;
        }
        if let Some(ttl) = self.cache_ttl_seconds {
            config.cache_ttl_seconds = ttl;
        }
        if self.email.is_some() {
            config.email.clone_from(&self.email);
        }
        if self.api_key.is_some() {
            config.api_key.clone_from(&self.api_key);
        }
        if let Some(source) = self.source {
            config.source_preference = source;
        }
        if let Some(default) = self.ambiguous_default {
            config.ambiguous_default = default;
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/pmcfetch/config.toml`
/// 2. `$HOME/.config/pmcfetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("pmcfetch")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("pmcfetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit` (which must exist) or the default path (if present).
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "cache_dir" => {
                cfg.cache_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "concurrency" => {
                cfg.concurrency = Some(parse_integer_u8(value).with_context(invalid)?);
            }
            "delay_seconds" => {
                cfg.delay_seconds = Some(parse_float(value).with_context(invalid)?);
            }
            "cache_ttl_seconds" => {
                cfg.cache_ttl_seconds = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "email" => {
                cfg.email = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "api_key" => {
                cfg.api_key = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "source" => {
                let label = parse_string_literal(value).with_context(invalid)?;
                let Some(source) = SourcePreference::from_label(&label) else {
                    bail!(
                        "Invalid `source` value on line {line_no}: expected one of: pubmed, europe_pmc, both"
                    );
                };
                cfg.source = Some(source);
            }
            "ambiguous_default" => {
                let label = parse_string_literal(value).with_context(invalid)?;
                let Some(default) = AmbiguousDefault::from_label(&label) else {
                    bail!(
                        "Invalid `ambiguous_default` value on line {line_no}: expected one of: pmid, pmcid"
                    );
                };
                cfg.ambiguous_default = Some(default);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u8(raw_value: &str) -> Result<u8> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<u16>()?;
    u8::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u8"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_float(raw_value: &str) -> Result<f64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected numeric value");
    }
    Ok(token.parse::<f64>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
concurrency = 8
source = "both"
"#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.concurrency, Some(8));
        assert_eq!(cfg.source, Some(SourcePreference::Both));
        assert!(cfg.output_dir.is_none());
    }

    #[test]
    fn test_parse_config_all_fields() {
        let cfg = parse_config_str(
            r#"
output_dir = "papers"
cache_dir = "/tmp/pmc-cache"
concurrency = 5
delay_seconds = 0.5
cache_ttl_seconds = 3600
email = "someone@example.org"
api_key = "abc123"
source = "europe_pmc"
ambiguous_default = "pmcid"
"#,
        )
        .expect("full config should parse");
        assert_eq!(cfg.output_dir, Some(PathBuf::from("papers")));
        assert_eq!(cfg.cache_dir, Some(PathBuf::from("/tmp/pmc-cache")));
        assert_eq!(cfg.delay_seconds, Some(0.5));
        assert_eq!(cfg.cache_ttl_seconds, Some(3600));
        assert_eq!(cfg.email.as_deref(), Some("someone@example.org"));
        assert_eq!(cfg.source, Some(SourcePreference::EuropePmc));
        assert_eq!(cfg.ambiguous_default, Some(AmbiguousDefault::Pmcid));
    }

    #[test]
    fn test_parse_config_rejects_invalid_concurrency() {
        let err = parse_config_str("concurrency = 0").expect_err("invalid concurrency expected");
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_parse_config_rejects_negative_delay() {
        let err = parse_config_str("delay_seconds = -2").expect_err("negative delay expected");
        assert!(err.to_string().contains("delay_seconds"));
    }

    #[test]
    fn test_parse_config_rejects_numeric_values_with_trailing_tokens() {
        let err = parse_config_str("concurrency = 4 trailing")
            .expect_err("expected trailing token error");
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_parse_config_names_line_of_unknown_key() {
        let err = parse_config_str("\n\nverbosity = \"quiet\"").expect_err("unknown key expected");
        let msg = err.to_string();
        assert!(msg.contains("verbosity"));
        assert!(msg.contains("line 3"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_source_label() {
        let err = parse_config_str("source = \"scopus\"").expect_err("bad source expected");
        assert!(err.to_string().contains("source"));
    }

    #[test]
    fn test_parse_config_requires_key_value_syntax() {
        let err = parse_config_str("concurrency").expect_err("syntax error expected");
        assert!(err.to_string().contains("expected key = value"));
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            r#"
concurrency = 4 # workers
email = "a#b@example.org" # hash inside quotes is kept
"#,
        )
        .expect("config with comments should parse");
        assert_eq!(cfg.concurrency, Some(4));
        assert_eq!(cfg.email.as_deref(), Some("a#b@example.org"));
    }

    #[test]
    fn test_apply_to_overrides_only_set_fields() {
        let file = FileConfig {
            concurrency: Some(7),
            email: Some("x@example.org".to_string()),
            ..FileConfig::default()
        };
        let mut config = Config::default();
        let before_output = config.output_dir.clone();

        file.apply_to(&mut config);

        assert_eq!(config.concurrency, 7);
        assert_eq!(config.email.as_deref(), Some("x@example.org"));
        assert_eq!(config.output_dir, before_output);
    }

    #[test]
    fn test_load_config_with_explicit_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "cache_ttl_seconds = 60\n").expect("write config");

        let loaded = load_config(Some(&path)).expect("config should load");

        assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.and_then(|c| c.cache_ttl_seconds), Some(60));
    }

    #[test]
    fn test_load_config_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_config(Some(&dir.path().join("missing.toml"))).expect_err("missing file");
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
