//! Data quality checks.
//!
//! A check is a named predicate that selects the *failing* rows of a batch,
//! e.g. `("negative_amount", Predicate::lt("amount", 0.0))`. Running checks
//! only reports; nothing here blocks a write.

use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, RecordBatch, StringArray};
use arrow::compute::kernels::cmp;
use arrow::compute::{and_kleene, can_cast_types, cast, is_not_null, is_null, not, or_kleene};
use arrow::datatypes::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::{column, PipelineError, Result};

type CustomPredicate = dyn Fn(&RecordBatch) -> Result<BooleanArray> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
        };
        f.write_str(symbol)
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Number(f64),
    Text(String),
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Number(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Number(value as f64)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Text(value.to_string())
    }
}

/// Boolean expression over a batch. Null results never count as failures.
#[derive(Clone)]
pub enum Predicate {
    IsNull(String),
    IsNotNull(String),
    Compare {
        column: String,
        op: CompareOp,
        value: Literal,
    },
    InSet {
        column: String,
        values: Vec<String>,
    },
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Custom(Arc<CustomPredicate>),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::IsNull(c) => write!(f, "{} IS NULL", c),
            Predicate::IsNotNull(c) => write!(f, "{} IS NOT NULL", c),
            Predicate::Compare { column, op, value } => write!(f, "{} {} {:?}", column, op, value),
            Predicate::InSet { column, values } => write!(f, "{} IN {:?}", column, values),
            Predicate::Not(inner) => write!(f, "NOT ({:?})", inner),
            Predicate::And(parts) => write!(f, "AND{:?}", parts),
            Predicate::Or(parts) => write!(f, "OR{:?}", parts),
            Predicate::Custom(_) => f.write_str("<custom>"),
        }
    }
}

impl Predicate {
    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull(column.into())
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Predicate::IsNotNull(column.into())
    }

    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Literal>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn in_set<S: Into<String>>(column: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Predicate::InSet {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RecordBatch) -> Result<BooleanArray> + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(f))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    /// Evaluate to one boolean per row (nulls where the result is unknown).
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        match self {
            Predicate::IsNull(name) => Ok(is_null(column(batch, name)?.as_ref())?),
            Predicate::IsNotNull(name) => Ok(is_not_null(column(batch, name)?.as_ref())?),
            Predicate::Compare {
                column: name,
                op,
                value,
            } => compare(batch, name, *op, value),
            Predicate::InSet {
                column: name,
                values,
            } => {
                let strings = as_type(column(batch, name)?, name, &DataType::Utf8)?;
                let strings = downcast::<StringArray>(&strings, name)?;
                Ok(strings
                    .iter()
                    .map(|v| v.map(|s| values.iter().any(|candidate| candidate == s)))
                    .collect())
            }
            Predicate::Not(inner) => Ok(not(&inner.evaluate(batch)?)?),
            Predicate::And(parts) => combine(batch, parts, and_kleene),
            Predicate::Or(parts) => combine(batch, parts, or_kleene),
            Predicate::Custom(f) => {
                let mask = f(batch)?;
                if mask.len() != batch.num_rows() {
                    return Err(PipelineError::InvalidInput(format!(
                        "custom predicate returned {} values for {} rows",
                        mask.len(),
                        batch.num_rows()
                    )));
                }
                Ok(mask)
            }
        }
    }
}

fn combine(
    batch: &RecordBatch,
    parts: &[Predicate],
    op: fn(&BooleanArray, &BooleanArray) -> std::result::Result<BooleanArray, arrow::error::ArrowError>,
) -> Result<BooleanArray> {
    let (first, rest) = parts.split_first().ok_or_else(|| {
        PipelineError::InvalidInput("AND/OR predicate needs at least one operand".to_string())
    })?;

    let mut acc = first.evaluate(batch)?;
    for part in rest {
        acc = op(&acc, &part.evaluate(batch)?)?;
    }
    Ok(acc)
}

fn as_type(array: &ArrayRef, name: &str, target: &DataType) -> Result<ArrayRef> {
    if array.data_type() == target {
        Ok(array.clone())
    } else if can_cast_types(array.data_type(), target) {
        Ok(cast(array, target)?)
    } else {
        Err(PipelineError::UnsupportedType {
            column: name.to_string(),
            data_type: array.data_type().clone(),
            operation: "quality predicate",
        })
    }
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, name: &str) -> Result<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| PipelineError::UnsupportedType {
            column: name.to_string(),
            data_type: array.data_type().clone(),
            operation: "quality predicate",
        })
}

fn compare(batch: &RecordBatch, name: &str, op: CompareOp, value: &Literal) -> Result<BooleanArray> {
    let source = column(batch, name)?;

    let (lhs, rhs): (ArrayRef, ArrayRef) = match value {
        Literal::Number(n) => (
            as_type(source, name, &DataType::Float64)?,
            Arc::new(Float64Array::from(vec![*n])),
        ),
        Literal::Text(s) => (
            as_type(source, name, &DataType::Utf8)?,
            Arc::new(StringArray::from(vec![s.as_str()])),
        ),
    };
    let rhs = arrow::array::Scalar::new(rhs);

    let result = match op {
        CompareOp::Lt => cmp::lt(&lhs, &rhs)?,
        CompareOp::Le => cmp::lt_eq(&lhs, &rhs)?,
        CompareOp::Gt => cmp::gt(&lhs, &rhs)?,
        CompareOp::Ge => cmp::gt_eq(&lhs, &rhs)?,
        CompareOp::Eq => cmp::eq(&lhs, &rhs)?,
        CompareOp::Ne => cmp::neq(&lhs, &rhs)?,
    };
    Ok(result)
}

/// Outcome of one named check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub failures: usize,
    pub total: usize,
    /// Percentage of failing rows, two decimals.
    pub rate: f64,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.failures == 0
    }
}

/// Failure percentage rounded to two decimals; zero for an empty dataset.
pub fn failure_rate(failures: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = failures as f64 / total as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub table: String,
    pub total_rows: usize,
    pub results: Vec<CheckResult>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(CheckResult::passed)
    }

    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

impl fmt::Display for QualityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed() { "PASSED" } else { "FAILED" };
        write!(f, "{}: {} quality checks", status, self.table)?;
        for result in &self.results {
            let icon = if result.passed() { "✓" } else { "✗" };
            write!(
                f,
                "\n  {} {}: {}/{} ({}%)",
                icon, result.name, result.failures, result.total, result.rate
            )?;
        }
        Ok(())
    }
}

/// Evaluate each named predicate and count the rows it selects.
pub fn run_quality_checks<S: AsRef<str>>(
    batch: &RecordBatch,
    table_name: &str,
    checks: &[(S, Predicate)],
) -> Result<QualityReport> {
    let total = batch.num_rows();

    let mut results = Vec::with_capacity(checks.len());
    for (name, predicate) in checks {
        let failures = predicate.evaluate(batch)?.true_count();
        results.push(CheckResult {
            name: name.as_ref().to_string(),
            failures,
            total,
            rate: failure_rate(failures, total),
        });
    }

    let report = QualityReport {
        table: table_name.to_string(),
        total_rows: total,
        results,
    };

    if report.passed() {
        tracing::info!("{}", report);
    } else {
        tracing::warn!("{}", report);
    }

    Ok(report)
}

/// Declarative check, e.g. from a TOML rules file:
///
/// ```toml
/// [[rules]]
/// name = "negative_amount"
/// column = "amount"
/// when = "lt"
/// value = 0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRule {
    pub name: String,
    pub column: String,
    #[serde(flatten)]
    pub condition: RuleCondition,
}

/// Condition that marks a row as failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum RuleCondition {
    IsNull,
    Lt { value: Literal },
    Le { value: Literal },
    Gt { value: Literal },
    Ge { value: Literal },
    Eq { value: Literal },
    Ne { value: Literal },
    In { values: Vec<String> },
    NotIn { values: Vec<String> },
}

impl QualityRule {
    pub fn to_predicate(&self) -> Predicate {
        let column = self.column.clone();
        match &self.condition {
            RuleCondition::IsNull => Predicate::is_null(column),
            RuleCondition::Lt { value } => Predicate::compare(column, CompareOp::Lt, value.clone()),
            RuleCondition::Le { value } => Predicate::compare(column, CompareOp::Le, value.clone()),
            RuleCondition::Gt { value } => Predicate::compare(column, CompareOp::Gt, value.clone()),
            RuleCondition::Ge { value } => Predicate::compare(column, CompareOp::Ge, value.clone()),
            RuleCondition::Eq { value } => Predicate::compare(column, CompareOp::Eq, value.clone()),
            RuleCondition::Ne { value } => Predicate::compare(column, CompareOp::Ne, value.clone()),
            RuleCondition::In { values } => Predicate::in_set(column, values.clone()),
            // Nulls are not "outside" the set; only present values can fail.
            RuleCondition::NotIn { values } => Predicate::is_not_null(self.column.clone())
                .and(Predicate::in_set(column, values.clone()).not()),
        }
    }
}

/// A rules document: `[[rules]]` tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityRules {
    #[serde(default)]
    pub rules: Vec<QualityRule>,
}

impl QualityRules {
    pub fn into_checks(self) -> Vec<(String, Predicate)> {
        self.rules
            .into_iter()
            .map(|rule| {
                let predicate = rule.to_predicate();
                (rule.name, predicate)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{Field, Schema};

    fn payments() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("amount", DataType::Float64, true),
            Field::new("currency", DataType::Utf8, true),
            Field::new("qty", DataType::Int64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Float64Array::from(vec![
                    Some(10.0),
                    Some(-5.0),
                    None,
                    Some(0.0),
                    Some(-1.0),
                    Some(3.0),
                ])),
                Arc::new(StringArray::from(vec![
                    Some("USD"),
                    Some("EUR"),
                    Some("USD"),
                    None,
                    Some("XXX"),
                    Some("USD"),
                ])),
                Arc::new(arrow::array::Int64Array::from(vec![1, 2, 3, 4, 5, 6])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn counts_failures_and_rates() {
        let checks = vec![
            ("negative_amount", Predicate::lt("amount", 0.0)),
            ("missing_amount", Predicate::is_null("amount")),
            ("huge_qty", Predicate::gt("qty", 100i64)),
        ];
        let report = run_quality_checks(&payments(), "silver_payments", &checks).unwrap();

        assert_eq!(report.total_rows, 6);
        let negative = report.get("negative_amount").unwrap();
        assert_eq!(negative.failures, 2);
        assert_eq!(negative.rate, 33.33);
        assert_eq!(report.get("missing_amount").unwrap().failures, 1);
        assert_eq!(report.get("missing_amount").unwrap().rate, 16.67);
        assert!(report.get("huge_qty").unwrap().passed());
        assert!(!report.passed());
        assert_eq!(report.results[0].name, "negative_amount");
    }

    #[test]
    fn empty_dataset_has_zero_rate() {
        let empty = payments().slice(0, 0);
        let report =
            run_quality_checks(&empty, "t", &[("neg", Predicate::lt("amount", 0.0))]).unwrap();
        assert_eq!(report.results[0].rate, 0.0);
        assert_eq!(report.results[0].total, 0);
        assert!(report.passed());
    }

    #[test]
    fn failure_rate_rounds_to_two_decimals() {
        assert_eq!(failure_rate(1, 3), 33.33);
        assert_eq!(failure_rate(2, 3), 66.67);
        assert_eq!(failure_rate(0, 10), 0.0);
        assert_eq!(failure_rate(5, 0), 0.0);
    }

    #[test]
    fn combinators_use_three_valued_logic() {
        let batch = payments();
        // amount < 0 AND currency != 'USD'
        let p = Predicate::lt("amount", 0.0).and(Predicate::compare("currency", CompareOp::Ne, "USD"));
        assert_eq!(p.evaluate(&batch).unwrap().true_count(), 2);

        let either = Predicate::is_null("amount").or(Predicate::is_null("currency"));
        assert_eq!(either.evaluate(&batch).unwrap().true_count(), 2);

        let not_negative = Predicate::lt("amount", 0.0).not();
        // The null amount stays unknown and is not counted.
        assert_eq!(not_negative.evaluate(&batch).unwrap().true_count(), 3);
    }

    #[test]
    fn string_comparisons_and_sets() {
        let batch = payments();
        assert_eq!(
            Predicate::eq("currency", "USD")
                .evaluate(&batch)
                .unwrap()
                .true_count(),
            3
        );
        assert_eq!(
            Predicate::in_set("currency", ["EUR", "XXX"])
                .evaluate(&batch)
                .unwrap()
                .true_count(),
            2
        );
    }

    #[test]
    fn custom_predicate_length_is_checked() {
        let bad = Predicate::custom(|_| Ok(BooleanArray::from(vec![true])));
        assert!(bad.evaluate(&payments()).is_err());

        let all = Predicate::custom(|b| Ok(BooleanArray::from(vec![true; b.num_rows()])));
        assert_eq!(all.evaluate(&payments()).unwrap().true_count(), 6);
    }

    #[test]
    fn unknown_column_is_an_error() {
        let result = run_quality_checks(&payments(), "t", &[("x", Predicate::is_null("nope"))]);
        assert!(matches!(result, Err(PipelineError::ColumnNotFound(_))));
    }

    #[test]
    fn rules_parse_from_toml() {
        let rules: QualityRules = toml::from_str(
            r#"
            [[rules]]
            name = "negative_amount"
            column = "amount"
            when = "lt"
            value = 0

            [[rules]]
            name = "unknown_currency"
            column = "currency"
            when = "not_in"
            values = ["USD", "EUR"]

            [[rules]]
            name = "missing_amount"
            column = "amount"
            when = "is_null"
            "#,
        )
        .unwrap();
        assert_eq!(rules.rules.len(), 3);
        assert_eq!(
            rules.rules[0].condition,
            RuleCondition::Lt {
                value: Literal::Number(0.0)
            }
        );

        let checks = rules.into_checks();
        let report = run_quality_checks(&payments(), "silver_payments", &checks).unwrap();
        assert_eq!(report.get("negative_amount").unwrap().failures, 2);
        assert_eq!(report.get("unknown_currency").unwrap().failures, 1);
        assert_eq!(report.get("missing_amount").unwrap().failures, 1);
    }

    #[test]
    fn report_display_lists_each_check() {
        let report = run_quality_checks(
            &payments(),
            "silver_payments",
            &[("negative_amount", Predicate::lt("amount", 0.0))],
        )
        .unwrap();
        let text = report.to_string();
        assert!(text.starts_with("FAILED: silver_payments quality checks"));
        assert!(text.contains("✗ negative_amount: 2/6 (33.33%)"));
    }
}
