//! Core data models for the compute service

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed set of numeric operations the service computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Prime,
    Fibonacci,
    Factorial,
    Power,
    SumOfNaturals,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Prime,
        Operation::Fibonacci,
        Operation::Factorial,
        Operation::Power,
        Operation::SumOfNaturals,
    ];

    /// Stable string form used in storage and URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Prime => "prime",
            Operation::Fibonacci => "fibonacci",
            Operation::Factorial => "factorial",
            Operation::Power => "power",
            Operation::SumOfNaturals => "sum_of_naturals",
        }
    }

    /// Parameter names the operation requires, in canonical order.
    pub fn required_parameters(&self) -> &'static [&'static str] {
        match self {
            Operation::Power => &["base", "exponent"],
            _ => &["count"],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown operation name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown operation: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prime" => Ok(Operation::Prime),
            "fibonacci" => Ok(Operation::Fibonacci),
            "factorial" => Ok(Operation::Factorial),
            "power" => Ok(Operation::Power),
            "sum_of_naturals" => Ok(Operation::SumOfNaturals),
            other => Err(UnknownOperation(other.to_string())),
        }
    }
}

/// Named integer inputs to an operation.
///
/// The map is ordered by parameter name, so [`Parameters::canonical_key`]
/// yields byte-equal keys for equal mappings regardless of insertion order.
/// That key, together with the operation, is the memoization identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters(BTreeMap<String, i64>);

impl Parameters {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_pairs<N, I>(pairs: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, i64)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    pub fn insert(&mut self, name: impl Into<String>, value: i64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.0.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deterministic serialized form: `name=value` pairs sorted by name,
    /// joined by commas, e.g. `base=2,exponent=10`.
    pub fn canonical_key(&self) -> String {
        let mut key = String::new();
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            key.push_str(name);
            key.push('=');
            key.push_str(&value.to_string());
        }
        key
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_key())
    }
}

/// A memoized computation, stored once per (operation, parameters) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationRecord {
    pub id: i64,
    pub operation: Operation,
    pub parameters_key: String,
    /// Decimal text; values can exceed native integer width.
    pub value: String,
    /// Wall-clock duration of the isolated worker, in microseconds.
    pub calculation_time_us: i64,
    /// Requester that triggered the original computation. Informational
    /// only; not part of the cache key.
    pub owner_email: String,
    pub created_at: DateTime<Utc>,
}

/// A computation result that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewComputation {
    pub operation: Operation,
    pub parameters_key: String,
    pub value: String,
    pub calculation_time_us: i64,
    pub owner_email: String,
}

/// One audit row per incoming request that resolved to a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub result_id: i64,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
}

/// An audit entry that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub result_id: i64,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
}

/// One host utilization reading per sampler tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSample {
    pub sampled_at: DateTime<Utc>,
    pub cpu_percent: f32,
    pub ram_percent: f32,
}

/// A registered user. Password digests never leave the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
    }

    #[test]
    fn test_operation_rejects_unknown_name() {
        let err = "cosine".parse::<Operation>().unwrap_err();
        assert_eq!(err, UnknownOperation("cosine".to_string()));
    }

    #[test]
    fn test_canonical_key_is_order_independent() {
        let a = Parameters::from_pairs([("exponent", 10), ("base", 2)]);
        let b = Parameters::from_pairs([("base", 2), ("exponent", 10)]);

        assert_eq!(a.canonical_key(), "base=2,exponent=10");
        assert_eq!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn test_canonical_key_single_parameter() {
        let params = Parameters::from_pairs([("count", 5)]);
        assert_eq!(params.canonical_key(), "count=5");
    }

    #[test]
    fn test_canonical_key_negative_value() {
        let params = Parameters::from_pairs([("base", -3), ("exponent", 2)]);
        assert_eq!(params.canonical_key(), "base=-3,exponent=2");
    }

    #[test]
    fn test_required_parameters() {
        assert_eq!(Operation::Prime.required_parameters(), &["count"]);
        assert_eq!(Operation::Power.required_parameters(), &["base", "exponent"]);
    }
}
