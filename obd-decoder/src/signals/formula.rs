//! Formula expressions
//!
//! Signals such as the odometer are assembled from several sub-fields before
//! scaling. A formula is a small expression tree so the evaluation order is
//! exactly the order it was written in.
//!
//! In signal-set JSON a formula is written as nested single-key objects:
//!
//! ```json
//! { "add": [ { "mul": [ "raw", { "const": 256.0 } ] }, { "field": "lo" } ] }
//! ```

use crate::types::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Expression over the primary field, named sub-fields and constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expr {
    /// Value of the rule's primary field
    Raw,
    /// Value of a named sub-field
    Field(String),
    Const(f64),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

/// Field values a formula is evaluated against
pub trait FieldLookup {
    fn raw(&self) -> f64;
    fn field(&self, name: &str) -> Option<f64>;
}

impl Expr {
    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(name.into())
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Self {
        Expr::Add(Box::new(lhs), Box::new(rhs))
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Self {
        Expr::Sub(Box::new(lhs), Box::new(rhs))
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Self {
        Expr::Mul(Box::new(lhs), Box::new(rhs))
    }

    pub fn div(lhs: Expr, rhs: Expr) -> Self {
        Expr::Div(Box::new(lhs), Box::new(rhs))
    }

    /// Names of all sub-fields referenced, in first-use order
    pub fn field_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_fields(&mut names);
        names
    }

    fn collect_fields<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Raw | Expr::Const(_) => {}
            Expr::Field(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                a.collect_fields(names);
                b.collect_fields(names);
            }
        }
    }

    /// Evaluate left operand first, then right, in f64
    pub fn eval(&self, values: &dyn FieldLookup) -> Result<f64, DecodeError> {
        match self {
            Expr::Raw => Ok(values.raw()),
            Expr::Field(name) => values
                .field(name)
                .ok_or_else(|| DecodeError::UnknownField(name.clone())),
            Expr::Const(v) => Ok(*v),
            Expr::Add(a, b) => Ok(a.eval(values)? + b.eval(values)?),
            Expr::Sub(a, b) => Ok(a.eval(values)? - b.eval(values)?),
            Expr::Mul(a, b) => Ok(a.eval(values)? * b.eval(values)?),
            Expr::Div(a, b) => {
                let numerator = a.eval(values)?;
                let denominator = b.eval(values)?;
                if denominator == 0.0 {
                    return Err(DecodeError::DivisionByZero);
                }
                Ok(numerator / denominator)
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Raw => write!(f, "raw"),
            Expr::Field(name) => write!(f, "{}", name),
            Expr::Const(v) => write!(f, "{}", v),
            Expr::Add(a, b) => write!(f, "({} + {})", a, b),
            Expr::Sub(a, b) => write!(f, "({} - {})", a, b),
            Expr::Mul(a, b) => write!(f, "({} * {})", a, b),
            Expr::Div(a, b) => write!(f, "({} / {})", a, b),
        }
    }
}
