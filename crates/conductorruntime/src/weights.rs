use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Weight for node types missing from the table
pub const DEFAULT_NODE_WEIGHT: f64 = 10.0;

/// Per-type cost heuristic used for progress weighting and the critical path.
///
/// These are tuning knobs, not measurements; load a different table from
/// config when the defaults misrepresent a deployment's node mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeWeights {
    pub default_weight: f64,
    pub by_type: HashMap<String, f64>,
}

impl NodeWeights {
    /// Table with no per-type entries
    pub fn uniform(weight: f64) -> Self {
        Self {
            default_weight: weight,
            by_type: HashMap::new(),
        }
    }

    pub fn with_weight(mut self, node_type: impl Into<String>, weight: f64) -> Self {
        self.by_type.insert(node_type.into(), weight);
        self
    }

    /// Always positive; non-positive table entries fall back to the default
    pub fn weight_for(&self, node_type: &str) -> f64 {
        match self.by_type.get(node_type) {
            Some(w) if *w > 0.0 => *w,
            _ if self.default_weight > 0.0 => self.default_weight,
            _ => DEFAULT_NODE_WEIGHT,
        }
    }
}

impl Default for NodeWeights {
    fn default() -> Self {
        let by_type = [
            ("debug.log", 5.0),
            ("transform.json_parse", 10.0),
            ("transform.json_stringify", 10.0),
            ("time.delay", 20.0),
            ("file.read", 30.0),
            ("file.write", 30.0),
            ("http.request", 50.0),
            ("system.command", 150.0),
            ("image.process", 400.0),
            ("group", 10.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            default_weight: DEFAULT_NODE_WEIGHT,
            by_type,
        }
    }
}
