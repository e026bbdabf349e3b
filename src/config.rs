//! Engine configuration file.
//!
//! ```toml
//! [engine]
//! alias_prefixes = ["sg_"]
//! alias_suffixes = ["_mandays", "_rate"]
//! precision_digits = 10
//! ```
//!
//! Problems are reported as warnings and the defaults are used instead.

use bidsheet_engine::engine::EngineConfig;
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const MAX_CONFIG_FILE_BYTES: u64 = 1_048_576; // 1 MiB

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    engine: Option<EngineConfig>,
}

pub fn load_config(config_file: Option<&Path>) -> (EngineConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();
    let Some(path) = config_file.map(Path::to_path_buf).or_else(user_config_path) else {
        return (EngineConfig::default(), warnings);
    };

    if !path.exists() {
        if config_file.is_some() {
            warnings.push(format!("Config file not found: {}", path.display()));
        }
        return (EngineConfig::default(), warnings);
    }

    let parsed = match std::fs::metadata(&path) {
        Ok(meta) if meta.len() > MAX_CONFIG_FILE_BYTES => {
            warnings.push(format!(
                "Refusing to read {}: file too large ({} bytes, max {})",
                path.display(),
                meta.len(),
                MAX_CONFIG_FILE_BYTES
            ));
            None
        }
        Ok(_) => match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<ConfigFile>(&content) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    warnings.push(format!("Failed to parse {}: {}", path.display(), err));
                    None
                }
            },
            Err(err) => {
                warnings.push(format!("Failed to read {}: {}", path.display(), err));
                None
            }
        },
        Err(err) => {
            warnings.push(format!(
                "Failed to read metadata for {}: {}",
                path.display(),
                err
            ));
            None
        }
    };

    let config = parsed.and_then(|f| f.engine).unwrap_or_default();
    if config.precision_digits < 0 {
        warnings.push(format!(
            "precision_digits must not be negative (got {}); using the default",
            config.precision_digits
        ));
        return (
            EngineConfig {
                precision_digits: EngineConfig::default().precision_digits,
                ..config
            },
            warnings,
        );
    }
    (config, warnings)
}

fn user_config_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "bidsheet")?;
    let mut path = proj.config_dir().to_path_buf();
    path.push("config.toml");
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bidsheet_{}_{}.toml", name, std::process::id()))
    }

    #[test]
    fn load_config_reads_engine_table() {
        let path = temp_path("config_ok");
        std::fs::write(
            &path,
            "[engine]\nalias_prefixes = [\"vfx_\"]\nprecision_digits = 4\n",
        )
        .expect("write temp config");

        let (config, warnings) = load_config(Some(&path));
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(config.alias_prefixes, vec!["vfx_".to_string()]);
        assert_eq!(config.precision_digits, 4);
        assert_eq!(config.alias_suffixes, EngineConfig::default().alias_suffixes);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn load_config_missing_file_warns() {
        let path = temp_path("config_missing");
        let (config, warnings) = load_config(Some(&path));
        assert_eq!(config, EngineConfig::default());
        assert!(warnings.iter().any(|w| w.contains("not found")));
    }

    #[test]
    fn load_config_rejects_unknown_keys() {
        let path = temp_path("config_unknown");
        std::fs::write(&path, "[engine]\nprecison_digits = 3\n").expect("write temp config");

        let (config, warnings) = load_config(Some(&path));
        assert_eq!(config, EngineConfig::default());
        assert!(warnings.iter().any(|w| w.contains("Failed to parse")));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn load_config_rejects_oversized_file() {
        let path = temp_path("config_large");
        let oversized = "#".repeat(MAX_CONFIG_FILE_BYTES as usize + 1);
        std::fs::write(&path, oversized).expect("write oversized config");

        let (_, warnings) = load_config(Some(&path));
        assert!(
            warnings
                .iter()
                .any(|w| w.contains("file too large") && w.contains("Refusing to read"))
        );

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn load_config_negative_precision_falls_back() {
        let path = temp_path("config_negative");
        std::fs::write(&path, "[engine]\nprecision_digits = -2\n").expect("write temp config");

        let (config, warnings) = load_config(Some(&path));
        assert_eq!(config.precision_digits, 10);
        assert_eq!(warnings.len(), 1);

        let _ = std::fs::remove_file(&path);
    }
}
