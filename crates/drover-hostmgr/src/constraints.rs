//! Scheduling-constraint evaluation against host attributes.

use drover_proto::{Attribute, LabelCondition, LabelConstraint};
use std::collections::HashMap;

/// Hostname label key, always present in the label bag.
const HOSTNAME_KEY: &str = "hostname";

/// Outcome of evaluating a constraint against a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluateResult {
    /// Constraint holds for this host.
    Match,
    /// Constraint rejects this host.
    Mismatch,
    /// Constraint does not concern host attributes.
    NotApplicable,
}

/// Evaluates a scheduling constraint against a host's label values.
///
/// The trait is the seam placement tests mock; `LabelEvaluator` is the
/// production implementation.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, constraint: &LabelConstraint, labels: &LabelValues) -> Result<EvaluateResult, EvalError>;
}

/// Error from a malformed constraint expression.
#[derive(Debug, thiserror::Error)]
#[error("constraint evaluation failed: {0}")]
pub struct EvalError(pub String);

/// Multiset of label occurrences on one host.
#[derive(Debug, Clone, Default)]
pub struct LabelValues {
    counts: HashMap<(String, String), u32>,
}

impl LabelValues {
    /// Builds the label bag for a host from its hostname and attributes.
    #[must_use]
    pub fn from_host(hostname: &str, attributes: &[Attribute]) -> Self {
        let mut counts = HashMap::new();
        counts.insert((HOSTNAME_KEY.to_owned(), hostname.to_owned()), 1);
        for attr in attributes {
            *counts
                .entry((attr.name.clone(), attr.value.clone()))
                .or_insert(0) += 1;
        }
        Self { counts }
    }

    /// Occurrence count for a (key, value) pair.
    #[must_use]
    pub fn count(&self, key: &str, value: &str) -> u32 {
        self.counts
            .get(&(key.to_owned(), value.to_owned()))
            .copied()
            .unwrap_or(0)
    }
}

/// Production evaluator over label expression trees.
#[derive(Debug, Default)]
pub struct LabelEvaluator;

impl LabelEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for LabelEvaluator {
    fn evaluate(&self, constraint: &LabelConstraint, labels: &LabelValues) -> Result<EvaluateResult, EvalError> {
        match constraint {
            LabelConstraint::And(children) => {
                if children.is_empty() {
                    return Err(EvalError("empty AND constraint".to_owned()));
                }
                let mut applicable = false;
                for child in children {
                    match self.evaluate(child, labels)? {
                        EvaluateResult::Mismatch => return Ok(EvaluateResult::Mismatch),
                        EvaluateResult::Match => applicable = true,
                        EvaluateResult::NotApplicable => {}
                    }
                }
                Ok(if applicable {
                    EvaluateResult::Match
                } else {
                    EvaluateResult::NotApplicable
                })
            }
            LabelConstraint::Or(children) => {
                if children.is_empty() {
                    return Err(EvalError("empty OR constraint".to_owned()));
                }
                let mut applicable = false;
                for child in children {
                    match self.evaluate(child, labels)? {
                        EvaluateResult::Match => return Ok(EvaluateResult::Match),
                        EvaluateResult::Mismatch => applicable = true,
                        EvaluateResult::NotApplicable => {}
                    }
                }
                Ok(if applicable {
                    EvaluateResult::Mismatch
                } else {
                    EvaluateResult::NotApplicable
                })
            }
            LabelConstraint::Label {
                key,
                value,
                condition,
                requirement,
            } => {
                let count = labels.count(key, value);
                let holds = match condition {
                    LabelCondition::LessThan => count < *requirement,
                    LabelCondition::Equal => count == *requirement,
                    LabelCondition::GreaterThan => count > *requirement,
                };
                Ok(if holds {
                    EvaluateResult::Match
                } else {
                    EvaluateResult::Mismatch
                })
            }
        }
    }
}
