//! Engine configuration.
//!
//! Studios name their tracking fields differently, so the short-alias
//! heuristic used by header references and the dependency tracker is driven
//! by prefix/suffix lists rather than constants.

use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Prefixes stripped from field names to build aliases (`sg_model_rate` -> `model_rate`).
    pub alias_prefixes: Vec<String>,
    /// Suffixes stripped from field names to build aliases (`sg_model_mandays` -> `sg_model`).
    pub alias_suffixes: Vec<String>,
    /// Decimal places kept when cleaning up numeric results.
    pub precision_digits: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            alias_prefixes: vec!["sg_".to_string()],
            alias_suffixes: ["_mandays", "_rate", "_hours", "_days", "_weeks"]
                .into_iter()
                .map(String::from)
                .collect(),
            precision_digits: 10,
        }
    }
}
