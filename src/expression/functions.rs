use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use super::ExpressionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Category {
    Math,
    Logic,
    Statistics,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Math, Category::Logic, Category::Statistics];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Math => "Math",
            Category::Logic => "Logic",
            Category::Statistics => "Statistics",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
            Arity::Between(lo, hi) => n >= lo && n <= hi,
        }
    }

    fn describe(&self) -> String {
        match *self {
            Arity::Exact(k) => k.to_string(),
            Arity::AtLeast(k) => format!("at least {}", k),
            Arity::Between(lo, hi) => format!("{} to {}", lo, hi),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionInfo {
    pub name: &'static str,
    pub syntax: &'static str,
    pub description: &'static str,
    pub category: Category,
    pub arity: Arity,
}

impl FunctionInfo {
    pub fn is_statistic(&self) -> bool {
        self.category == Category::Statistics
    }

    pub fn check_arity(&self, got: usize) -> Result<(), ExpressionError> {
        if self.arity.accepts(got) {
            Ok(())
        } else {
            Err(ExpressionError::ArgumentCount {
                function: self.name.to_string(),
                expected: self.arity.describe(),
                got,
            })
        }
    }
}

impl PartialEq for FunctionInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

macro_rules! function {
    ($name:literal, $syntax:literal, $category:ident, $arity:expr, $description:literal) => {
        FunctionInfo {
            name: $name,
            syntax: $syntax,
            description: $description,
            category: Category::$category,
            arity: $arity,
        }
    };
}

pub static FUNCTIONS: &[FunctionInfo] = &[
    function!("sqrt", "sqrt(x)", Math, Arity::Exact(1), "Square root of x"),
    function!("pow", "pow(x, y)", Math, Arity::Exact(2), "x raised to the power y"),
    function!("abs", "abs(x)", Math, Arity::Exact(1), "Absolute value of x"),
    function!("log", "log(x)", Math, Arity::Exact(1), "Natural logarithm of x"),
    function!("log10", "log10(x)", Math, Arity::Exact(1), "Base-10 logarithm of x"),
    function!("exp", "exp(x)", Math, Arity::Exact(1), "e raised to the power x"),
    function!("sin", "sin(x)", Math, Arity::Exact(1), "Sine of x (radians)"),
    function!("cos", "cos(x)", Math, Arity::Exact(1), "Cosine of x (radians)"),
    function!("tan", "tan(x)", Math, Arity::Exact(1), "Tangent of x (radians)"),
    function!("asin", "asin(x)", Math, Arity::Exact(1), "Arc sine of x, x in [-1, 1]"),
    function!("acos", "acos(x)", Math, Arity::Exact(1), "Arc cosine of x, x in [-1, 1]"),
    function!("atan", "atan(x)", Math, Arity::Exact(1), "Arc tangent of x"),
    function!("round", "round(x[, places])", Math, Arity::Between(1, 2), "Round half away from zero"),
    function!("floor", "floor(x)", Math, Arity::Exact(1), "Largest integer not above x"),
    function!("ceil", "ceil(x)", Math, Arity::Exact(1), "Smallest integer not below x"),
    function!("min", "min(a, b, ...)", Math, Arity::AtLeast(1), "Smallest argument"),
    function!("max", "max(a, b, ...)", Math, Arity::AtLeast(1), "Largest argument"),
    function!("if", "if(condition, then, else)", Logic, Arity::Exact(3), "then when condition is non-zero, else otherwise"),
    function!("and", "and(a, b, ...)", Logic, Arity::AtLeast(2), "1 when every argument is non-zero"),
    function!("or", "or(a, b, ...)", Logic, Arity::AtLeast(2), "1 when any argument is non-zero"),
    function!("not", "not(x)", Logic, Arity::Exact(1), "1 when x is zero"),
    function!("avg", "avg(\"variable\", \"window\")", Statistics, Arity::Exact(2), "Average over the time window"),
    function!("movingAvg", "movingAvg(\"variable\", \"window\")", Statistics, Arity::Exact(2), "Moving average over the time window"),
    function!("stddev", "stddev(\"variable\", \"window\")", Statistics, Arity::Exact(2), "Population standard deviation over the time window"),
    function!("sum", "sum(\"variable\", \"window\")", Statistics, Arity::Exact(2), "Sum over the time window"),
    function!("count", "count(\"variable\", \"window\")", Statistics, Arity::Exact(2), "Number of data points in the time window"),
    function!("minTime", "minTime(\"variable\", \"window\")", Statistics, Arity::Exact(2), "Minimum over the time window"),
    function!("maxTime", "maxTime(\"variable\", \"window\")", Statistics, Arity::Exact(2), "Maximum over the time window"),
    function!("rate", "rate(\"variable\", \"window\")", Statistics, Arity::Exact(2), "Change per hour across the time window"),
    function!("percentChange", "percentChange(\"variable\", \"window\")", Statistics, Arity::Exact(2), "Percent change across the time window"),
    function!("median", "median(\"variable\", \"window\")", Statistics, Arity::Exact(2), "Median over the time window"),
];

/// Case-insensitive lookup
pub fn lookup(name: &str) -> Option<&'static FunctionInfo> {
    FUNCTIONS.iter().find(|f| f.name.eq_ignore_ascii_case(name))
}

pub fn by_category(category: Category) -> Vec<&'static FunctionInfo> {
    FUNCTIONS.iter().filter(|f| f.category == category).collect()
}

fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn invalid(function: &str, message: &str) -> ExpressionError {
    ExpressionError::InvalidArgument(format!("{}: {}", function, message))
}

/// Round half away from zero to `places` decimals
pub fn round_half_up(x: f64, places: i64) -> f64 {
    let places = places.clamp(0, 28) as u32;
    match Decimal::from_f64(x) {
        Some(d) => d
            .round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
            .to_f64()
            .unwrap_or(x),
        None => x,
    }
}

/// Apply a math or logic function to already evaluated arguments.
pub fn apply(spec: &FunctionInfo, args: &[f64]) -> Result<f64, ExpressionError> {
    spec.check_arity(args.len())?;
    let name = spec.name;
    let x = args.first().copied().unwrap_or_default();

    let value = match name {
        "sqrt" => {
            if x < 0.0 {
                return Err(invalid(name, "argument must be non-negative"));
            }
            x.sqrt()
        }
        "pow" => x.powf(args[1]),
        "abs" => x.abs(),
        "log" | "log10" => {
            if x <= 0.0 {
                return Err(invalid(name, "argument must be positive"));
            }
            if name == "log" {
                x.ln()
            } else {
                x.log10()
            }
        }
        "exp" => x.exp(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "asin" | "acos" => {
            if !(-1.0..=1.0).contains(&x) {
                return Err(invalid(name, "argument must be between -1 and 1"));
            }
            if name == "asin" {
                x.asin()
            } else {
                x.acos()
            }
        }
        "atan" => x.atan(),
        "round" => {
            let places = args.get(1).map(|p| *p as i64).unwrap_or(0);
            round_half_up(x, places)
        }
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "min" => args.iter().copied().fold(f64::INFINITY, f64::min),
        "max" => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        "if" => {
            if x != 0.0 {
                args[1]
            } else {
                args[2]
            }
        }
        "and" => truth(args.iter().all(|a| *a != 0.0)),
        "or" => truth(args.iter().any(|a| *a != 0.0)),
        "not" => truth(x == 0.0),
        other => return Err(ExpressionError::UnknownFunction(other.to_string())),
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[f64]) -> Result<f64, ExpressionError> {
        apply(lookup(name).unwrap(), args)
    }

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(lookup("SQRT").unwrap().name, "sqrt");
        assert_eq!(lookup("movingavg").unwrap().name, "movingAvg");
        assert!(lookup("nope").is_none());
    }

    #[test]
    fn every_category_has_functions() {
        for category in Category::ALL {
            assert!(!by_category(category).is_empty());
        }
        assert_eq!(by_category(Category::Statistics).len(), 10);
    }

    #[test]
    fn math_domain_errors() {
        assert!(call("sqrt", &[-1.0]).is_err());
        assert!(call("log", &[0.0]).is_err());
        assert!(call("log10", &[-5.0]).is_err());
        assert!(call("asin", &[1.5]).is_err());
        assert_eq!(call("sqrt", &[16.0]).unwrap(), 4.0);
        assert_eq!(call("log10", &[1000.0]).unwrap(), 3.0);
    }

    #[test]
    fn round_is_half_away_from_zero() {
        assert_eq!(call("round", &[2.5]).unwrap(), 3.0);
        assert_eq!(call("round", &[-2.5]).unwrap(), -3.0);
        assert_eq!(call("round", &[0.125, 2.0]).unwrap(), 0.13);
        assert_eq!(call("round", &[3.14159, 3.0]).unwrap(), 3.142);
    }

    #[test]
    fn logic_returns_one_or_zero() {
        assert_eq!(call("if", &[1.0, 10.0, 20.0]).unwrap(), 10.0);
        assert_eq!(call("if", &[0.0, 10.0, 20.0]).unwrap(), 20.0);
        assert_eq!(call("and", &[1.0, 2.0]).unwrap(), 1.0);
        assert_eq!(call("and", &[1.0, 0.0]).unwrap(), 0.0);
        assert_eq!(call("or", &[0.0, 0.0, 3.0]).unwrap(), 1.0);
        assert_eq!(call("not", &[0.0]).unwrap(), 1.0);
    }

    #[test]
    fn arity_errors_name_the_function() {
        let err = call("if", &[1.0, 2.0]).unwrap_err();
        assert_eq!(err.to_string(), "if: expected 3 argument(s), got 2");
        let err = call("and", &[1.0]).unwrap_err();
        assert_eq!(err.to_string(), "and: expected at least 2 argument(s), got 1");
        assert!(call("min", &[]).is_err());
    }

    #[test]
    fn min_and_max_are_variadic() {
        assert_eq!(call("min", &[3.0, -1.0, 2.0]).unwrap(), -1.0);
        assert_eq!(call("max", &[3.0]).unwrap(), 3.0);
    }
}
