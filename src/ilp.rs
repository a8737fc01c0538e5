//! Linear expressions over the ILP variables bound to CFG blocks.
//!
//! The downstream WCET computation attaches one execution-count variable
//! per block; an event bound `1·x_h` says the miss count is limited by the
//! execution count of block `h`.

use crate::cfg::{BlockId, CfgCollection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Term {
    pub coef: i64,
    pub var: BlockId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expression {
    terms: Vec<Term>,
}

impl Expression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Add a term, merging with an existing term on the same variable.
    pub fn add(&mut self, coef: i64, var: BlockId) {
        for t in &mut self.terms {
            if t.var == var {
                t.coef += coef;
                return;
            }
        }
        self.terms.push(Term { coef, var });
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn format(&self, cfgs: &CfgCollection) -> String {
        let mut out = String::new();
        for (i, t) in self.terms.iter().enumerate() {
            if i != 0 {
                out.push_str(" + ");
            }
            out.push_str(&format!("{}*x_{}", t.coef, cfgs.blocks[t.var].name));
        }
        out
    }
}
