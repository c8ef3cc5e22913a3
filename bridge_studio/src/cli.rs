use anyhow::{anyhow, bail, Context, Result};
use scene_bridge::BridgeConfigOverrides;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_FRAMES: u32 = 120;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StudioOverrides {
    pub config: Option<PathBuf>,
    registry: Option<PathBuf>,
    frames: Option<u32>,
    fail_batch: Option<bool>,
    audit_jsonl: Option<PathBuf>,
    retry_delay_ms: Option<u64>,
    json_summary: Option<bool>,
}

impl StudioOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = StudioOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            if !flag.starts_with("--") {
                bail!("Unexpected argument '{flag}'. Flags take the form --name value.");
            }
            let key = &flag[2..];
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => overrides.config = Some(PathBuf::from(value)),
                "registry" => overrides.registry = Some(PathBuf::from(value)),
                "audit-jsonl" => overrides.audit_jsonl = Some(PathBuf::from(value)),
                "frames" => {
                    overrides.frames =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid frame count '{value}'"))?);
                }
                "retry-delay" => {
                    overrides.retry_delay_ms =
                        Some(value.parse::<u64>().with_context(|| format!("Invalid retry delay '{value}'"))?);
                }
                "fail-batch" => overrides.fail_batch = Some(parse_bool_flag("fail-batch", &value)?),
                "summary" => {
                    overrides.json_summary = Some(match value.to_ascii_lowercase().as_str() {
                        "json" => true,
                        "text" => false,
                        other => bail!("Invalid summary format '{other}'. Use text or json."),
                    });
                }
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --config, --registry, --frames, --fail-batch, \
                     --audit-jsonl, --retry-delay, --summary."
                ),
            }
        }
        Ok(overrides)
    }

    pub fn frames(&self) -> u32 {
        self.frames.unwrap_or(DEFAULT_FRAMES)
    }

    pub fn fail_batch(&self) -> bool {
        self.fail_batch.unwrap_or(false)
    }

    pub fn json_summary(&self) -> bool {
        self.json_summary.unwrap_or(false)
    }

    pub fn config_overrides(&self) -> BridgeConfigOverrides {
        BridgeConfigOverrides {
            registry_path: self.registry.clone(),
            retry_delay_ms: self.retry_delay_ms,
            audit_jsonl: self.audit_jsonl.clone(),
        }
    }
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn parses_paths_frames_and_toggles() {
        let args = ["studio", "--registry", "r.json", "--frames", "12", "--fail-batch", "on"];
        let overrides = StudioOverrides::parse(args).expect("parse overrides");
        assert_eq!(overrides.frames(), 12);
        assert!(overrides.fail_batch());
        let config = overrides.config_overrides();
        assert_eq!(config.registry_path.as_deref(), Some(Path::new("r.json")));
        assert_eq!(config.applied_fields(), vec!["registry_path"]);
    }

    #[test]
    fn defaults_apply_without_flags() {
        let overrides = StudioOverrides::parse(["studio"]).expect("parse overrides");
        assert_eq!(overrides.frames(), DEFAULT_FRAMES);
        assert!(!overrides.fail_batch());
        assert!(!overrides.json_summary());
        assert!(overrides.config_overrides().is_empty());
    }

    #[test]
    fn missing_value_errors() {
        let err = StudioOverrides::parse(["studio", "--frames"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_unknown_flags_and_bad_numbers() {
        assert!(StudioOverrides::parse(["studio", "--width", "10"]).unwrap_err().to_string().contains("Unknown flag"));
        assert!(StudioOverrides::parse(["studio", "--frames", "many"]).is_err());
        assert!(StudioOverrides::parse(["studio", "--fail-batch", "maybe"]).is_err());
        assert!(StudioOverrides::parse(["studio", "--summary", "yaml"]).is_err());
    }

    #[test]
    fn summary_format_selects_json() {
        let overrides = StudioOverrides::parse(["studio", "--summary", "JSON"]).expect("parse overrides");
        assert!(overrides.json_summary());
        assert!(overrides.config_overrides().is_empty());
    }
}
