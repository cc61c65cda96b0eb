//! Declarative rule conditions and the context they are evaluated against.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// Comparison operator of a rule condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Gt,
    Lt,
    Eq,
    Contains,
}

/// Value on either side of a condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::List(_) => "list",
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        Self::List(v)
    }
}

/// Named facts about a vehicle or transition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleContext {
    fields: HashMap<String, FieldValue>,
}

impl RuleContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    /// Insert only when the value is known
    #[must_use]
    pub fn with_opt(self, field: &str, value: Option<impl Into<FieldValue>>) -> Self {
        match value {
            Some(v) => self.with(field, v),
            None => self,
        }
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

/// Single `field operator value` test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: FieldValue,
}

impl RuleCondition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Evaluate against a context. A field absent from the context never
    /// matches.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::RuleEvaluation` when the operator cannot compare
    /// the two value kinds.
    pub fn evaluate(&self, ctx: &RuleContext) -> Result<bool, DomainError> {
        let Some(actual) = ctx.get(&self.field) else {
            return Ok(false);
        };

        match (self.operator, actual, &self.value) {
            (ConditionOperator::Gt, FieldValue::Number(a), FieldValue::Number(b)) => Ok(a > b),
            (ConditionOperator::Lt, FieldValue::Number(a), FieldValue::Number(b)) => Ok(a < b),

            (ConditionOperator::Eq, FieldValue::Number(a), FieldValue::Number(b)) => {
                Ok((a - b).abs() < f64::EPSILON)
            }
            (ConditionOperator::Eq, FieldValue::Bool(a), FieldValue::Bool(b)) => Ok(a == b),
            (ConditionOperator::Eq, FieldValue::Text(a), FieldValue::Text(b)) => {
                Ok(a.eq_ignore_ascii_case(b))
            }

            (ConditionOperator::Contains, FieldValue::Text(a), FieldValue::Text(b)) => {
                Ok(a.to_lowercase().contains(&b.to_lowercase()))
            }
            (ConditionOperator::Contains, FieldValue::List(items), FieldValue::Text(b)) => {
                Ok(items.iter().any(|item| item.eq_ignore_ascii_case(b)))
            }

            (op, a, b) => Err(DomainError::RuleEvaluation(format!(
                "cannot apply {op:?} to field '{}' ({}) and {}",
                self.field,
                a.kind(),
                b.kind()
            ))),
        }
    }
}
