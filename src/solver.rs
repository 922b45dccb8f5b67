//! Mixed-integer program description and the solver seam.
//!
//! Passes only formulate problems as an [`IntProgram`] and read back variable
//! values; solving is delegated to a [`MilpSolver`]. [`GoodLpSolver`] is the
//! bundled implementation, backed by `good_lp` with the pure-Rust `microlp`
//! engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Solver failure modes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("problem is infeasible")]
    Infeasible,

    #[error("problem is unbounded")]
    Unbounded,

    #[error("solver failure: {0}")]
    Failed(String),
}

/// Handle of a decision variable inside one program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarId(pub usize);

/// Domain of a decision variable.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Domain {
    /// 0 or 1
    Binary,
    /// Real within bounds
    Continuous { lower: f64, upper: Option<f64> },
}

impl Domain {
    /// Non-negative real.
    pub fn non_negative() -> Self {
        Domain::Continuous {
            lower: 0.0,
            upper: None,
        }
    }
}

/// A named decision variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VarDef {
    pub name: String,
    pub domain: Domain,
}

/// Linear expression `sum(coef * var) + constant`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinearExpr {
    /// Empty expression (zero).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `coef * var`.
    pub fn term(mut self, var: VarId, coef: f64) -> Self {
        self.terms.push((var, coef));
        self
    }

    /// Adds `coef * var` in place.
    pub fn add_term(&mut self, var: VarId, coef: f64) {
        self.terms.push((var, coef));
    }

    /// Sum of the given variables with unit coefficients.
    pub fn sum<I: IntoIterator<Item = VarId>>(vars: I) -> Self {
        Self {
            terms: vars.into_iter().map(|v| (v, 1.0)).collect(),
            constant: 0.0,
        }
    }

    /// Evaluates the expression against solved values.
    pub fn eval(&self, solution: &Solution) -> f64 {
        self.terms
            .iter()
            .map(|&(v, c)| c * solution.value(v))
            .sum::<f64>()
            + self.constant
    }
}

/// Comparison operator of a constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmp {
    Le,
    Ge,
    Eq,
}

/// Linear constraint `expr <cmp> rhs`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub expr: LinearExpr,
    pub cmp: Cmp,
    pub rhs: f64,
}

/// Optimization direction. Every pass in this crate minimizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    Minimize,
}

/// A complete problem description handed to a solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntProgram {
    pub name: String,
    pub vars: Vec<VarDef>,
    pub constraints: Vec<Constraint>,
    pub objective: LinearExpr,
    pub sense: Sense,
}

impl IntProgram {
    /// Creates an empty minimization problem.
    pub fn minimize(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: Vec::new(),
            constraints: Vec::new(),
            objective: LinearExpr::new(),
            sense: Sense::Minimize,
        }
    }

    /// Declares a variable and returns its handle.
    pub fn add_var(&mut self, name: impl Into<String>, domain: Domain) -> VarId {
        self.vars.push(VarDef {
            name: name.into(),
            domain,
        });
        VarId(self.vars.len() - 1)
    }

    /// Adds a constraint.
    pub fn constrain(&mut self, name: impl Into<String>, expr: LinearExpr, cmp: Cmp, rhs: f64) {
        self.constraints.push(Constraint {
            name: name.into(),
            expr,
            cmp,
            rhs,
        });
    }

    /// Sets the objective.
    pub fn set_objective(&mut self, objective: LinearExpr) {
        self.objective = objective;
    }

    /// Number of variables.
    pub fn var_count(&self) -> usize {
        self.vars.len()
    }
}

/// Solved variable values, indexed by [`VarId`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub values: Vec<f64>,
}

impl Solution {
    /// Value of `var`.
    pub fn value(&self, var: VarId) -> f64 {
        self.values.get(var.0).copied().unwrap_or(0.0)
    }

    /// Value of a 0/1 variable, rounded.
    pub fn is_set(&self, var: VarId) -> bool {
        self.value(var).round() >= 1.0
    }
}

/// Anything that can solve an [`IntProgram`].
pub trait MilpSolver: Send + Sync {
    /// Solves `program`, returning one value per declared variable.
    fn solve(&self, program: &IntProgram) -> Result<Solution, SolveError>;
}

/// Solver backed by `good_lp` and its `microlp` engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct GoodLpSolver;

impl GoodLpSolver {
    /// Creates the solver.
    pub fn new() -> Self {
        Self
    }
}

impl MilpSolver for GoodLpSolver {
    fn solve(&self, program: &IntProgram) -> Result<Solution, SolveError> {
        use good_lp::{
            variable, Expression, IntoAffineExpression, ProblemVariables, Solution as _,
            SolverModel,
        };

        let mut problem = ProblemVariables::new();
        let vars: Vec<good_lp::Variable> = program
            .vars
            .iter()
            .map(|def| {
                let v = variable().name(def.name.clone());
                let v = match def.domain {
                    Domain::Binary => v.binary(),
                    Domain::Continuous { lower, upper } => {
                        let v = v.min(lower);
                        match upper {
                            Some(u) => v.max(u),
                            None => v,
                        }
                    }
                };
                problem.add(v)
            })
            .collect();

        let lower = |expr: &LinearExpr| -> Expression {
            let mut out = expr.constant.into_expression();
            for &(var, coef) in &expr.terms {
                out.add_mul(coef, vars[var.0]);
            }
            out
        };

        let objective = lower(&program.objective);
        let mut model = match program.sense {
            Sense::Minimize => problem.minimise(objective),
        }
        .using(good_lp::solvers::microlp::microlp);

        for c in &program.constraints {
            let lhs = lower(&c.expr);
            let constraint = match c.cmp {
                Cmp::Le => good_lp::constraint::leq(lhs, c.rhs),
                Cmp::Ge => good_lp::constraint::geq(lhs, c.rhs),
                Cmp::Eq => good_lp::constraint::eq(lhs, c.rhs),
            };
            model.add_constraint(constraint);
        }

        tracing::debug!(
            problem = %program.name,
            vars = program.vars.len(),
            constraints = program.constraints.len(),
            "solving program"
        );

        let solved = model.solve().map_err(|e| match e {
            good_lp::ResolutionError::Infeasible => SolveError::Infeasible,
            good_lp::ResolutionError::Unbounded => SolveError::Unbounded,
            other => SolveError::Failed(other.to_string()),
        })?;

        Ok(Solution {
            values: vars.iter().map(|&v| solved.value(v)).collect(),
        })
    }
}
