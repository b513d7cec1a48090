//! Rule coefficients and type biases
//!
//! Weights usually come from an external optimiser as a single JSON blob:
//!
//! ```json
//! {"coeffs": [["titleIsBig", 30.04]], "biases": [["title", -1.2]]}
//! ```
//!
//! Rules without a coefficient weigh 1; types without a bias get 0.

use crate::error::PlumbResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-rule weights and per-type biases
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    /// Rule name to weight
    #[serde(default)]
    pub coeffs: Vec<(String, f64)>,
    /// Type name to additive bias
    #[serde(default)]
    pub biases: Vec<(String, f64)>,
}

impl Coefficients {
    /// Build from borrowed name/value pairs
    pub fn from_pairs<'a>(
        coeffs: impl IntoIterator<Item = (&'a str, f64)>,
        biases: impl IntoIterator<Item = (&'a str, f64)>,
    ) -> Self {
        Self {
            coeffs: coeffs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            biases: biases.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    /// Parse the optimiser's JSON blob
    pub fn from_json(json: &str) -> PlumbResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialise to the optimiser's JSON blob
    pub fn to_json(&self) -> PlumbResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Rule name to weight; later entries win over earlier duplicates
    pub fn coeff_map(&self) -> HashMap<String, f64> {
        self.coeffs.iter().cloned().collect()
    }

    /// Type name to bias; later entries win over earlier duplicates
    pub fn bias_map(&self) -> HashMap<String, f64> {
        self.biases.iter().cloned().collect()
    }
}
