//! Arithmetic expression language for synthetic variables.
//!
//! Expressions combine telemetry variables with numbers, arithmetic,
//! comparisons (which yield 1 or 0) and calls to the functions registered in
//! [`functions`]. Statistics functions look back over a device's history and
//! need a [`statistics::StatisticsSource`].

pub mod functions;
pub mod lexer;
pub mod parser;
pub mod statistics;

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use parser::{BinaryOp, Expr, Parser};
use statistics::{SeriesData, SeriesKey, StatisticsContext, StatisticsSource};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("Expression is empty")]
    Empty,

    #[error("Unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Unterminated string literal")]
    UnterminatedString,

    #[error("Unexpected token: {0}")]
    UnexpectedToken(String),

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("{function}: expected {expected} argument(s), got {got}")]
    ArgumentCount {
        function: String,
        expected: String,
        got: usize,
    },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("String literals can only be used as function arguments")]
    StringNotAllowed,

    #[error("Invalid time window: {0}. Use <n>s, <n>m, <n>h or <n>d")]
    InvalidWindow(String),

    #[error("{0}: statistics functions require a device context")]
    MissingContext(String),

    #[error("Failed to load statistics: {0}")]
    Source(String),

    #[error("Expression result is not a finite number")]
    NotFinite,

    #[error("Expression nests deeper than {0} levels")]
    TooDeep(usize),

    #[error("Expression is longer than {0} characters")]
    TooLong(usize),
}

/// Longest expression source accepted by [`Expression::parse`]
pub const MAX_SOURCE_LEN: usize = 2_000;

/// A parsed expression, ready to evaluate any number of times
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        if source.chars().count() > MAX_SOURCE_LEN {
            return Err(ExpressionError::TooLong(MAX_SOURCE_LEN));
        }
        let tokens = lexer::tokenize(source)?;
        let ast = Parser::new(tokens).parse()?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct `(variable, window)` series referenced by statistics calls
    pub fn series_keys(&self) -> Vec<SeriesKey> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        collect_series(&self.ast, &mut seen, &mut keys);
        keys
    }

    pub fn evaluate(&self, variables: &HashMap<String, f64>) -> Result<f64, ExpressionError> {
        self.evaluate_with(variables, None)
    }

    pub fn evaluate_with(
        &self,
        variables: &HashMap<String, f64>,
        series: Option<&SeriesData>,
    ) -> Result<f64, ExpressionError> {
        let value = eval(&self.ast, variables, series)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ExpressionError::NotFinite)
        }
    }
}

/// Evaluate with statistics resolved against a device's history
pub async fn evaluate_in_context(
    expression: &Expression,
    variables: &HashMap<String, f64>,
    source: &dyn StatisticsSource,
    context: &StatisticsContext,
) -> Result<f64, ExpressionError> {
    let series = statistics::prefetch(expression, source, context).await?;
    expression.evaluate_with(variables, Some(&series))
}

fn collect_series(expr: &Expr, seen: &mut HashSet<SeriesKey>, keys: &mut Vec<SeriesKey>) {
    match expr {
        Expr::Number(_) | Expr::Str(_) | Expr::Variable(_) => {}
        Expr::Neg(inner) => collect_series(inner, seen, keys),
        Expr::Binary(_, left, right) => {
            collect_series(left, seen, keys);
            collect_series(right, seen, keys);
        }
        Expr::Call(_, args) => {
            for arg in args {
                collect_series(arg, seen, keys);
            }
        }
        Expr::Statistic(_, variable, window) => {
            let key = SeriesKey {
                variable: variable.clone(),
                window: *window,
            };
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
    }
}

fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn eval(
    expr: &Expr,
    variables: &HashMap<String, f64>,
    series: Option<&SeriesData>,
) -> Result<f64, ExpressionError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Str(_) => Err(ExpressionError::StringNotAllowed),
        Expr::Variable(name) => variables
            .get(name)
            .copied()
            .ok_or_else(|| ExpressionError::UnknownVariable(name.clone())),
        Expr::Neg(inner) => Ok(-eval(inner, variables, series)?),
        Expr::Binary(op, left, right) => {
            let l = eval(left, variables, series)?;
            let r = eval(right, variables, series)?;
            Ok(match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => {
                    if r == 0.0 {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    l / r
                }
                BinaryOp::Gt => truth(l > r),
                BinaryOp::Lt => truth(l < r),
                BinaryOp::Gte => truth(l >= r),
                BinaryOp::Lte => truth(l <= r),
                BinaryOp::Eq => truth(l == r),
                BinaryOp::Ne => truth(l != r),
            })
        }
        Expr::Call(spec, args) => {
            let values = args
                .iter()
                .map(|arg| eval(arg, variables, series))
                .collect::<Result<Vec<f64>, _>>()?;
            functions::apply(spec, &values)
        }
        Expr::Statistic(spec, variable, window) => {
            let data = series.ok_or_else(|| ExpressionError::MissingContext(spec.name.to_string()))?;
            let key = SeriesKey {
                variable: variable.clone(),
                window: *window,
            };
            let values = data.get(&key).map(Vec::as_slice).unwrap_or(&[]);
            Ok(statistics::compute(spec.name, values, window))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use uuid::Uuid;

    fn vars(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn eval_str(src: &str, pairs: &[(&str, f64)]) -> Result<f64, ExpressionError> {
        Expression::parse(src)?.evaluate(&vars(pairs))
    }

    #[test]
    fn evaluates_arithmetic_with_precedence() {
        assert_eq!(eval_str("1 + 2 * 3", &[]).unwrap(), 7.0);
        assert_eq!(eval_str("(1 + 2) * 3", &[]).unwrap(), 9.0);
        assert_eq!(eval_str("-2 * -3", &[]).unwrap(), 6.0);
        assert_eq!(eval_str("10 - 4 - 3", &[]).unwrap(), 3.0);
        assert_eq!(eval_str("12 / 4 / 3", &[]).unwrap(), 1.0);
    }

    #[test]
    fn computes_power_from_variables() {
        let value = eval_str("voltage * current / 1000", &[("voltage", 230.0), ("current", 10.0)]).unwrap();
        assert_eq!(value, 2.3);
    }

    #[test]
    fn comparisons_yield_one_or_zero() {
        assert_eq!(eval_str("temp > 30", &[("temp", 31.0)]).unwrap(), 1.0);
        assert_eq!(eval_str("temp > 30", &[("temp", 29.0)]).unwrap(), 0.0);
        assert_eq!(eval_str("1 + 1 == 2", &[]).unwrap(), 1.0);
        assert_eq!(eval_str("1 != 1", &[]).unwrap(), 0.0);
        assert_eq!(eval_str("if(temp >= 30, 1, 2)", &[("temp", 30.0)]).unwrap(), 1.0);
    }

    #[test]
    fn function_names_ignore_case() {
        assert_eq!(eval_str("SQRT(16) + Abs(-1)", &[]).unwrap(), 5.0);
        assert_eq!(eval_str("ROUND(1.25, 1)", &[]).unwrap(), 1.3);
    }

    #[test]
    fn reports_evaluation_errors() {
        assert_eq!(eval_str("x + 1", &[]), Err(ExpressionError::UnknownVariable("x".into())));
        assert_eq!(eval_str("1 / 0", &[]), Err(ExpressionError::DivisionByZero));
        assert_eq!(eval_str("1 / (a - a)", &[("a", 3.0)]), Err(ExpressionError::DivisionByZero));
        assert_eq!(eval_str("'x' + 1", &[]), Err(ExpressionError::StringNotAllowed));
        assert!(matches!(eval_str("sqrt(-4)", &[]), Err(ExpressionError::InvalidArgument(_))));
    }

    #[test]
    fn oversized_source_is_rejected_before_lexing() {
        let long = vec!["1"; MAX_SOURCE_LEN / 2 + 1].join("+");
        assert_eq!(Expression::parse(&long).unwrap_err(), ExpressionError::TooLong(MAX_SOURCE_LEN));

        let nested = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(Expression::parse(&nested).unwrap_err(), ExpressionError::TooLong(MAX_SOURCE_LEN));
    }

    #[test]
    fn longest_flat_sum_still_evaluates() {
        let src = vec!["1"; MAX_SOURCE_LEN / 2].join("+");
        assert_eq!(eval_str(&src, &[]), Ok((MAX_SOURCE_LEN / 2) as f64));
    }

    #[test]
    fn statistics_need_a_context() {
        let err = eval_str("avg('voltage', '5m')", &[]).unwrap_err();
        assert_eq!(err, ExpressionError::MissingContext("avg".into()));
    }

    struct FixedSource {
        values: Vec<f64>,
        calls: Mutex<Vec<(String, DateTime<Utc>, DateTime<Utc>)>>,
    }

    #[async_trait]
    impl StatisticsSource for FixedSource {
        async fn values(
            &self,
            _device_id: Uuid,
            variable: &str,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<f64>, ExpressionError> {
            self.calls.lock().unwrap().push((variable.to_string(), from, to));
            Ok(self.values.clone())
        }
    }

    #[tokio::test]
    async fn prefetches_each_series_once() {
        let source = FixedSource {
            values: vec![10.0, 0.0, 20.0, 30.0],
            calls: Mutex::new(Vec::new()),
        };
        let expression = Expression::parse("avg('kw', '1h') + sum(kw, \"1h\") + count('kw', '1h')").unwrap();
        let timestamp: DateTime<Utc> = "2025-11-11T12:00:00Z".parse().unwrap();
        let context = StatisticsContext {
            device_id: Uuid::new_v4(),
            timestamp,
        };

        let value = evaluate_in_context(&expression, &HashMap::new(), &source, &context)
            .await
            .unwrap();

        // zeros are dropped: avg 20 + sum 60 + count 3
        assert_eq!(value, 83.0);
        let calls = source.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (variable, from, to) = &calls[0];
        assert_eq!(variable, "kw");
        assert_eq!(*from, "2025-11-11T11:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(*to, timestamp + chrono::Duration::milliseconds(1));
    }
}
