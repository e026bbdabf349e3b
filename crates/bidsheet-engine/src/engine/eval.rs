//! Expression engine adapter.
//!
//! [`ExpressionEngine`] is the seam between the evaluator and whatever runs
//! the arithmetic. [`RhaiEngine`] parses formula text into an [`Expr`], lowers
//! it to a Rhai script and executes that script against a scope holding the
//! resolved inputs.
//!
//! Lowering keeps Rhai's own grammar out of the picture: every literal and
//! every input becomes a scope variable, and every operator becomes a call
//! to a builtin, so spreadsheet precedence is fixed by the parse tree.

use rhai::{AST, Dynamic, Engine, Scope};
use std::collections::HashMap;

use super::formula::{BinaryOp, Expr, InputRef, UnaryOp, parse_formula};
use super::{FormulaError, Value};
use crate::builtins::{
    classify_error, dynamic_to_value, is_supported, register_builtins, value_to_dynamic,
};

/// A resolved input handed to the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum InputValue {
    Scalar(Value),
    /// Rows of values, top to bottom.
    Range(Vec<Vec<Value>>),
}

pub type Inputs = HashMap<InputRef, InputValue>;

pub trait ExpressionEngine: Send + Sync {
    type Compiled;

    /// Parse preprocessed formula text (without `=`).
    fn compile(&self, formula: &str) -> Result<Self::Compiled, FormulaError>;

    /// Cells and ranges the compiled formula reads.
    fn inputs(&self, compiled: &Self::Compiled) -> Vec<InputRef>;

    fn execute(&self, compiled: &Self::Compiled, inputs: &Inputs) -> Result<Value, FormulaError>;
}

pub struct RhaiEngine {
    engine: Engine,
}

pub struct RhaiFormula {
    ast: AST,
    inputs: Vec<InputRef>,
    constants: Vec<Dynamic>,
}

impl Default for RhaiEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        register_builtins(&mut engine);
        RhaiEngine { engine }
    }
}

fn input_var(input: &InputRef) -> String {
    match input {
        InputRef::Cell(c) => format!("c_{}_{}", c.row, c.col),
        InputRef::Range(a, b) => format!("r_{}_{}_{}_{}", a.row, a.col, b.row, b.col),
    }
}

fn op_fn(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "ADD",
        BinaryOp::Sub => "SUB",
        BinaryOp::Mul => "MUL",
        BinaryOp::Div => "DIV",
        BinaryOp::Pow => "POW",
        BinaryOp::Concat => "CONCAT",
        BinaryOp::Eq => "EQ",
        BinaryOp::Ne => "NE",
        BinaryOp::Lt => "LT",
        BinaryOp::Le => "LE",
        BinaryOp::Gt => "GT",
        BinaryOp::Ge => "GE",
    }
}

#[derive(Default)]
struct Lowering {
    constants: Vec<Dynamic>,
}

impl Lowering {
    fn constant(&mut self, value: Dynamic) -> String {
        self.constants.push(value);
        format!("k{}", self.constants.len() - 1)
    }

    fn lower(&mut self, expr: &Expr) -> Result<String, FormulaError> {
        Ok(match expr {
            Expr::Number(n) => self.constant(Dynamic::from_float(*n)),
            Expr::Text(s) => self.constant(Dynamic::from(s.clone())),
            Expr::Bool(b) => self.constant(Dynamic::from_bool(*b)),
            Expr::Error(e) => {
                let token = self.constant(Dynamic::from(e.token().to_string()));
                format!("RAISE({token})")
            }
            Expr::Ref(c) => input_var(&InputRef::Cell(*c)),
            Expr::Range(a, b) => input_var(&InputRef::Range(*a, *b)),
            Expr::Unary(op, inner) => {
                let name = match op {
                    UnaryOp::Neg => "NEG",
                    UnaryOp::Plus => "PLUS",
                    UnaryOp::Percent => "PCT",
                };
                format!("{}({})", name, self.lower(inner)?)
            }
            Expr::Binary(op, l, r) => {
                format!("{}({}, {})", op_fn(*op), self.lower(l)?, self.lower(r)?)
            }
            Expr::Call(name, args) if name == "IF" => {
                if args.len() < 2 || args.len() > 3 {
                    return Err(FormulaError::Parse);
                }
                let cond = self.lower(&args[0])?;
                let then = self.lower(&args[1])?;
                let otherwise = match args.get(2) {
                    Some(e) => self.lower(e)?,
                    None => self.constant(Dynamic::from_bool(false)),
                };
                format!("(if TRUTHY({cond}) {{ {then} }} else {{ {otherwise} }})")
            }
            Expr::Call(name, args) => {
                let lowered = args
                    .iter()
                    .map(|a| self.lower(a))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("{}([{}])", name, lowered.join(", "))
            }
        })
    }
}

impl ExpressionEngine for RhaiEngine {
    type Compiled = RhaiFormula;

    fn compile(&self, formula: &str) -> Result<RhaiFormula, FormulaError> {
        let expr = parse_formula(formula)?;
        if let Some(name) = expr.function_names().iter().find(|n| !is_supported(n)) {
            log::debug!("unsupported function {} in '{}'", name, formula);
            return Err(FormulaError::NotSupported);
        }

        let mut lowering = Lowering::default();
        let script = lowering.lower(&expr)?;
        let ast = self.engine.compile(&script).map_err(|e| {
            log::warn!("lowered formula '{}' failed to compile: {}", script, e);
            FormulaError::Parse
        })?;

        Ok(RhaiFormula {
            ast,
            inputs: expr.inputs(),
            constants: lowering.constants,
        })
    }

    fn inputs(&self, compiled: &RhaiFormula) -> Vec<InputRef> {
        compiled.inputs.clone()
    }

    fn execute(&self, compiled: &RhaiFormula, inputs: &Inputs) -> Result<Value, FormulaError> {
        let mut scope = Scope::new();
        for (idx, value) in compiled.constants.iter().enumerate() {
            scope.push_dynamic(format!("k{idx}"), value.clone());
        }
        for input in &compiled.inputs {
            let value = match inputs.get(input) {
                Some(InputValue::Scalar(v)) => value_to_dynamic(v),
                Some(InputValue::Range(rows)) => Dynamic::from_array(
                    rows.iter()
                        .map(|row| Dynamic::from_array(row.iter().map(value_to_dynamic).collect()))
                        .collect(),
                ),
                None => Dynamic::UNIT,
            };
            scope.push_dynamic(input_var(input), value);
        }

        self.engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &compiled.ast)
            .map(dynamic_to_value)
            .map_err(|e| classify_error(&e))
    }
}
