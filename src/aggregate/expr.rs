// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Scalar expressions for `APPLY` and `FILTER` stages.
//!
//! ```text
//! APPLY "@Price * @Quantity" AS Total
//! APPLY "format(\"%s-%s\", @First, @Last)" AS Label
//! APPLY "timefmt(@CreatedAt, \"%Y-%m\")" AS Month
//! APPLY "geodistance(@Home, -122.4, 37.7)" AS Distance
//! FILTER "(@Age > 20 && @Status == \"active\")"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Rem, Sub};

use super::Scope;
use crate::error::{Result, SearchError};
use crate::query::compiler::{flatten, format_number};
use crate::query::{CompareOp, FilterNode, Literal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
            ArithOp::Pow => "^",
        };
        write!(f, "{}", s)
    }
}

/// Builtin functions understood by the aggregation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Function {
    // string
    Format,
    Upper,
    Lower,
    Substr,
    Contains,
    StartsWith,
    Strlen,
    Split,
    // math
    Abs,
    Ceil,
    Floor,
    Log,
    Log2,
    Exp,
    Sqrt,
    // date
    TimeFmt,
    ParseTime,
    Day,
    Hour,
    Minute,
    Month,
    DayOfWeek,
    DayOfMonth,
    DayOfYear,
    Year,
    MonthOfYear,
    // geo
    GeoDistance,
    Exists,
}

impl Function {
    pub fn name(self) -> &'static str {
        match self {
            Function::Format => "format",
            Function::Upper => "upper",
            Function::Lower => "lower",
            Function::Substr => "substr",
            Function::Contains => "contains",
            Function::StartsWith => "startswith",
            Function::Strlen => "strlen",
            Function::Split => "split",
            Function::Abs => "abs",
            Function::Ceil => "ceil",
            Function::Floor => "floor",
            Function::Log => "log",
            Function::Log2 => "log2",
            Function::Exp => "exp",
            Function::Sqrt => "sqrt",
            Function::TimeFmt => "timefmt",
            Function::ParseTime => "parsetime",
            Function::Day => "day",
            Function::Hour => "hour",
            Function::Minute => "minute",
            Function::Month => "month",
            Function::DayOfWeek => "dayofweek",
            Function::DayOfMonth => "dayofmonth",
            Function::DayOfYear => "dayofyear",
            Function::Year => "year",
            Function::MonthOfYear => "monthofyear",
            Function::GeoDistance => "geodistance",
            Function::Exists => "exists",
        }
    }

    /// Accepted argument counts, inclusive. `usize::MAX` means variadic.
    fn arity(self) -> (usize, usize) {
        match self {
            Function::Format => (1, usize::MAX),
            Function::Substr => (3, 3),
            Function::Contains | Function::StartsWith => (2, 2),
            Function::Split => (1, 3),
            Function::TimeFmt => (1, 2),
            Function::ParseTime => (2, 2),
            // two points, or a point and a lon/lat pair, or two lon/lat pairs
            Function::GeoDistance => (2, 4),
            _ => (1, 1),
        }
    }
}

/// Scalar expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Indexed field or an alias produced by an earlier stage
    Field(String),
    Number(f64),
    Text(String),
    Binary {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(name.into())
    }

    pub fn number(value: impl Into<f64>) -> Self {
        Expr::Number(value.into())
    }

    pub fn text(value: impl Into<String>) -> Self {
        Expr::Text(value.into())
    }

    pub fn call(function: Function, args: Vec<Expr>) -> Self {
        Expr::Call { function, args }
    }

    pub fn binary(op: ArithOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn pow(self, exponent: Expr) -> Self {
        Self::binary(ArithOp::Pow, self, exponent)
    }

    /// `format("%s-%s", a, b)`
    pub fn format(template: impl Into<String>, args: Vec<Expr>) -> Self {
        let mut all = vec![Expr::text(template)];
        all.extend(args);
        Self::call(Function::Format, all)
    }

    pub fn upper(self) -> Self {
        Self::call(Function::Upper, vec![self])
    }

    pub fn lower(self) -> Self {
        Self::call(Function::Lower, vec![self])
    }

    pub fn substr(self, offset: i64, count: i64) -> Self {
        Self::call(
            Function::Substr,
            vec![self, Expr::Number(offset as f64), Expr::Number(count as f64)],
        )
    }

    /// `timefmt(expr, fmt)`; truncates a timestamp to the format's resolution.
    pub fn timefmt(self, format: impl Into<String>) -> Self {
        Self::call(Function::TimeFmt, vec![self, Expr::text(format)])
    }

    /// Date extraction/truncation: `day`, `hour`, `month`, `year`, …
    pub fn date(self, function: Function) -> Self {
        Self::call(function, vec![self])
    }

    /// `geodistance(self, lon, lat)` in meters.
    pub fn geodistance(self, longitude: f64, latitude: f64) -> Self {
        Self::call(
            Function::GeoDistance,
            vec![self, Expr::Number(longitude), Expr::Number(latitude)],
        )
    }

    pub fn exists(self) -> Self {
        Self::call(Function::Exists, vec![self])
    }

    pub(crate) fn compile(&self, scope: &Scope<'_>) -> Result<String> {
        match self {
            Expr::Field(name) => scope.field_ref(name),
            Expr::Number(n) => Ok(format_number(*n)),
            Expr::Text(s) => Ok(quote(s)),
            Expr::Binary { op, left, right } => Ok(format!(
                "{} {} {}",
                operand(left, scope)?,
                op,
                operand(right, scope)?
            )),
            Expr::Call { function, args } => {
                let (min, max) = function.arity();
                if args.len() < min || args.len() > max {
                    return Err(SearchError::translation(format!(
                        "{}() takes {} arguments, got {}",
                        function.name(),
                        if min == max {
                            min.to_string()
                        } else if max == usize::MAX {
                            format!("at least {}", min)
                        } else {
                            format!("{} to {}", min, max)
                        },
                        args.len()
                    )));
                }
                let args = args
                    .iter()
                    .map(|a| a.compile(scope))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{}({})", function.name(), args.join(", ")))
            }
        }
    }
}

fn operand(expr: &Expr, scope: &Scope<'_>) -> Result<String> {
    let compiled = expr.compile(scope)?;
    if matches!(expr, Expr::Binary { .. }) {
        Ok(format!("({})", compiled))
    } else {
        Ok(compiled)
    }
}

macro_rules! arith_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }
    };
}

arith_op!(Add, add, ArithOp::Add);
arith_op!(Sub, sub, ArithOp::Sub);
arith_op!(Mul, mul, ArithOp::Mul);
arith_op!(Div, div, ArithOp::Div);
arith_op!(Rem, rem, ArithOp::Mod);

/// Double-quoted string literal.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Compile a filter tree to `FILTER` expression syntax.
pub(crate) fn filter_expression(node: &FilterNode, scope: &Scope<'_>, top: bool) -> Result<String> {
    let wrap = |parts: Vec<String>, separator: &str| {
        if parts.len() == 1 || top {
            parts.join(separator)
        } else {
            format!("({})", parts.join(separator))
        }
    };

    match node {
        FilterNode::And(_) => {
            let mut members = Vec::new();
            flatten(node, true, &mut members);
            if members.is_empty() {
                return Err(SearchError::translation("empty FILTER stage"));
            }
            let parts = members
                .iter()
                .map(|m| filter_expression(m, scope, false))
                .collect::<Result<Vec<_>>>()?;
            Ok(wrap(parts, " && "))
        }
        FilterNode::Or(_) => {
            let mut members = Vec::new();
            flatten(node, false, &mut members);
            if members.is_empty() {
                return Err(SearchError::translation("OR needs at least one alternative"));
            }
            let parts = members
                .iter()
                .map(|m| filter_expression(m, scope, false))
                .collect::<Result<Vec<_>>>()?;
            Ok(wrap(parts, " || "))
        }
        FilterNode::Not(inner) => Ok(format!("!({})", filter_expression(inner, scope, true)?)),
        FilterNode::Compare { field, op, value } => {
            let operator = match op {
                CompareOp::Eq => "==",
                CompareOp::Ne => "!=",
                CompareOp::Gt => ">",
                CompareOp::Ge => ">=",
                CompareOp::Lt => "<",
                CompareOp::Le => "<=",
            };
            Ok(format!("{} {} {}", scope.field_ref(field)?, operator, literal(value)))
        }
        FilterNode::Contains { field, value } => {
            Ok(format!("contains({}, {})", scope.field_ref(field)?, quote(value)))
        }
        FilterNode::StartsWith { field, value } => {
            Ok(format!("startswith({}, {})", scope.field_ref(field)?, quote(value)))
        }
        FilterNode::AnyOf { field, values } => {
            if values.is_empty() {
                return Err(SearchError::translation(format!("tag set for '{}' is empty", field)));
            }
            let field = scope.field_ref(field)?;
            let parts: Vec<String> = values
                .iter()
                .map(|v| format!("{} == {}", field, quote(v)))
                .collect();
            Ok(wrap(parts, " || "))
        }
        FilterNode::Raw(text) if top => Ok(text.clone()),
        FilterNode::Raw(text) => Ok(format!("({})", text)),
        other => Err(SearchError::translation(format!(
            "{} cannot be expressed in a FILTER stage after the first transformation",
            describe(other)
        ))),
    }
}

fn literal(value: &Literal) -> String {
    match value {
        Literal::Text(s) => quote(s),
        Literal::Number(n) => format_number(*n),
        Literal::Bool(b) => quote(&b.to_string()),
    }
}

fn describe(node: &FilterNode) -> &'static str {
    match node {
        FilterNode::EndsWith { .. } => "EndsWith",
        FilterNode::Fuzzy { .. } => "Fuzzy",
        FilterNode::CollectionContains { .. } => "CollectionContains",
        FilterNode::GeoWithin { .. } => "GeoWithin",
        FilterNode::VectorKnn { .. } => "VectorKnn",
        _ => "This node",
    }
}
