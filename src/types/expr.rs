//! Boolean targeting expressions.
//!
//! A segment's targeting is an [`Expr`] over named criteria. `And`/`Or`
//! operands are sets, so duplicate operands collapse and operand order never
//! affects equality or evaluation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Immutable boolean expression over named references.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Constant true.
    True,
    /// Constant false.
    False,
    /// Reference to a named criterion; true iff the criterion is satisfied.
    Ref(String),
    /// Negation.
    Not(Box<Expr>),
    /// Conjunction of a set of operands. Empty conjunction is true.
    And(BTreeSet<Expr>),
    /// Disjunction of a set of operands. Empty disjunction is false.
    Or(BTreeSet<Expr>),
}

#[derive(Clone, Copy)]
enum Junction {
    And,
    Or,
}

impl Junction {
    fn identity(self) -> Expr {
        match self {
            Junction::And => Expr::True,
            Junction::Or => Expr::False,
        }
    }

    fn absorbing(self) -> Expr {
        match self {
            Junction::And => Expr::False,
            Junction::Or => Expr::True,
        }
    }

    fn build(self, operands: BTreeSet<Expr>) -> Expr {
        match self {
            Junction::And => Expr::And(operands),
            Junction::Or => Expr::Or(operands),
        }
    }

    /// Operands of `expr` if it is a junction of the same kind.
    fn operands_of(self, expr: Expr) -> Result<BTreeSet<Expr>, Expr> {
        match (self, expr) {
            (Junction::And, Expr::And(ops)) | (Junction::Or, Expr::Or(ops)) => Ok(ops),
            (_, other) => Err(other),
        }
    }
}

impl Expr {
    /// Reference to a named criterion.
    pub fn reference(name: impl Into<String>) -> Self {
        Expr::Ref(name.into())
    }

    /// Conjunction of the given operands.
    pub fn and(operands: impl IntoIterator<Item = Expr>) -> Self {
        Expr::And(operands.into_iter().collect())
    }

    /// Disjunction of the given operands.
    pub fn or(operands: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Or(operands.into_iter().collect())
    }

    /// Negation of `inner`.
    pub fn negate(inner: Expr) -> Self {
        Expr::Not(Box::new(inner))
    }

    /// Evaluate against the set of references that are true.
    pub fn eval(&self, true_refs: &HashSet<String>) -> bool {
        self.eval_with(&|name| true_refs.contains(name))
    }

    /// Evaluate with a caller-supplied reference oracle.
    pub fn eval_with<F>(&self, is_true: &F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        match self {
            Expr::True => true,
            Expr::False => false,
            Expr::Ref(name) => is_true(name),
            Expr::Not(inner) => !inner.eval_with(is_true),
            Expr::And(ops) => ops.iter().all(|op| op.eval_with(is_true)),
            Expr::Or(ops) => ops.iter().any(|op| op.eval_with(is_true)),
        }
    }

    /// All reference names used anywhere in this expression.
    pub fn refs(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::True | Expr::False => {}
            Expr::Ref(name) => {
                out.insert(name.as_str());
            }
            Expr::Not(inner) => inner.collect_refs(out),
            Expr::And(ops) | Expr::Or(ops) => {
                for op in ops {
                    op.collect_refs(out);
                }
            }
        }
    }

    /// Algebraic simplification, applied bottom-up.
    ///
    /// Removes double negation, folds constants, flattens nested junctions of
    /// the same kind and collapses a junction containing both `x` and `!x` to
    /// its absorbing element. The result is a fixed point:
    /// `e.simplify().simplify() == e.simplify()`.
    pub fn simplify(&self) -> Expr {
        match self {
            Expr::True | Expr::False | Expr::Ref(_) => self.clone(),
            Expr::Not(inner) => match inner.simplify() {
                Expr::True => Expr::False,
                Expr::False => Expr::True,
                Expr::Not(x) => *x,
                other => Expr::Not(Box::new(other)),
            },
            Expr::And(ops) => simplify_junction(ops, Junction::And),
            Expr::Or(ops) => simplify_junction(ops, Junction::Or),
        }
    }
}

fn simplify_junction(ops: &BTreeSet<Expr>, junction: Junction) -> Expr {
    let identity = junction.identity();
    let absorbing = junction.absorbing();

    let mut flat: BTreeSet<Expr> = BTreeSet::new();
    for op in ops {
        let simplified = op.simplify();
        if simplified == identity {
            continue;
        }
        if simplified == absorbing {
            return absorbing;
        }
        match junction.operands_of(simplified) {
            // Already simplified: contains no constants and no nested junction of this kind.
            Ok(inner) => flat.extend(inner),
            Err(other) => {
                flat.insert(other);
            }
        }
    }

    // Negated-pair reduction: x and !x together reduce to the absorbing element.
    // A same-kind junction x was flattened above, so look for its operands instead.
    let has_pair = flat.iter().any(|e| match e {
        Expr::Not(inner) => match junction.operands_of(inner.as_ref().clone()) {
            Ok(ops) => ops.iter().all(|op| flat.contains(op)),
            Err(other) => flat.contains(&other),
        },
        _ => false,
    });
    if has_pair {
        return absorbing;
    }

    match flat.len() {
        0 => identity,
        1 => flat.into_iter().next().unwrap_or(identity),
        _ => junction.build(flat),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, ops: &BTreeSet<Expr>, sep: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, op) in ops.iter().enumerate() {
                if i > 0 {
                    write!(f, " {sep} ")?;
                }
                write!(f, "{op}")?;
            }
            write!(f, ")")
        }

        match self {
            Expr::True => write!(f, "TRUE"),
            Expr::False => write!(f, "FALSE"),
            Expr::Ref(name) => write!(f, "{name}"),
            Expr::Not(inner) => write!(f, "(NOT {inner})"),
            Expr::And(ops) => join(f, ops, "AND"),
            Expr::Or(ops) => join(f, ops, "OR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(name: &str) -> Expr {
        Expr::reference(name)
    }

    fn refs(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_eval_ref_and_constants() {
        let t = refs(&["a"]);
        assert!(r("a").eval(&t));
        assert!(!r("b").eval(&t));
        assert!(Expr::True.eval(&t));
        assert!(!Expr::False.eval(&t));
        assert!(Expr::negate(r("b")).eval(&t));
    }

    #[test]
    fn test_eval_junctions() {
        let t = refs(&["a", "b"]);
        assert!(Expr::and([r("a"), r("b")]).eval(&t));
        assert!(!Expr::and([r("a"), r("c")]).eval(&t));
        assert!(Expr::or([r("c"), r("b")]).eval(&t));
        assert!(!Expr::or([r("c"), r("d")]).eval(&t));
        assert!(Expr::and([]).eval(&t));
        assert!(!Expr::or([]).eval(&t));
    }

    #[test]
    fn test_duplicate_operands_collapse() {
        let e = Expr::and([r("a"), r("a"), r("b")]);
        match &e {
            Expr::And(ops) => assert_eq!(ops.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_double_negation() {
        let e = Expr::negate(Expr::negate(r("x")));
        assert_eq!(e.simplify(), r("x"));
        assert_eq!(Expr::negate(Expr::True).simplify(), Expr::False);
        assert_eq!(Expr::negate(Expr::False).simplify(), Expr::True);
    }

    #[test]
    fn test_and_constant_folding() {
        assert_eq!(Expr::and([Expr::True, r("a")]).simplify(), r("a"));
        assert_eq!(Expr::and([Expr::False, r("a")]).simplify(), Expr::False);
        assert_eq!(Expr::and([Expr::True, Expr::True]).simplify(), Expr::True);
        assert_eq!(Expr::and([]).simplify(), Expr::True);
    }

    #[test]
    fn test_or_constant_folding() {
        assert_eq!(Expr::or([Expr::False, r("a")]).simplify(), r("a"));
        assert_eq!(Expr::or([Expr::True, r("a")]).simplify(), Expr::True);
        assert_eq!(Expr::or([]).simplify(), Expr::False);
    }

    #[test]
    fn test_flatten_nested() {
        let e = Expr::and([r("a"), Expr::and([r("b"), Expr::and([r("c")])])]);
        assert_eq!(e.simplify(), Expr::and([r("a"), r("b"), r("c")]));

        // Different junction kinds are not flattened into each other.
        let e = Expr::and([r("a"), Expr::or([r("b"), r("c")])]);
        assert_eq!(e.simplify(), e);
    }

    #[test]
    fn test_negated_pair() {
        assert_eq!(Expr::and([r("x"), Expr::negate(r("x"))]).simplify(), Expr::False);
        assert_eq!(Expr::or([r("x"), Expr::negate(r("x"))]).simplify(), Expr::True);
        assert_eq!(
            Expr::and([r("x"), Expr::negate(r("x")), r("y")]).simplify(),
            Expr::False
        );
        // Unmatched negations survive.
        assert_eq!(
            Expr::and([r("x"), Expr::negate(r("y"))]).simplify(),
            Expr::and([r("x"), Expr::negate(r("y"))])
        );
    }

    #[test]
    fn test_negated_pair_found_after_flattening() {
        let e = Expr::or([r("x"), Expr::or([Expr::negate(Expr::negate(Expr::negate(r("x"))))])]);
        assert_eq!(e.simplify(), Expr::True);
    }

    #[test]
    fn test_negated_junction_pair() {
        let ab = Expr::and([r("a"), r("b")]);
        assert_eq!(Expr::and([ab.clone(), Expr::negate(ab.clone())]).simplify(), Expr::False);
        let not_ab = Expr::negate(ab);
        assert_eq!(Expr::and([not_ab.clone(), Expr::negate(not_ab)]).simplify(), Expr::False);
        let cd = Expr::or([r("c"), r("d")]);
        assert_eq!(Expr::or([cd.clone(), Expr::negate(cd)]).simplify(), Expr::True);
    }

    #[test]
    fn test_simplify_idempotent_on_sample() {
        let e = Expr::or([
            Expr::and([r("a"), Expr::True, Expr::negate(Expr::negate(r("b")))]),
            Expr::negate(Expr::and([r("c"), Expr::False])),
            Expr::or([r("d"), Expr::False]),
        ]);
        let once = e.simplify();
        assert_eq!(once.simplify(), once);
        assert_eq!(once, Expr::True);
    }

    #[test]
    fn test_refs() {
        let e = Expr::and([r("a"), Expr::negate(r("b")), Expr::or([r("a"), r("c")])]);
        let names: Vec<&str> = e.refs().into_iter().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_display() {
        let e = Expr::and([r("a"), Expr::negate(r("b"))]);
        assert_eq!(e.to_string(), "(a AND (NOT b))");
    }

    #[test]
    fn test_serde_shape() {
        let e = Expr::and([r("a"), Expr::negate(r("b"))]);
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, r#"{"and":[{"ref":"a"},{"not":{"ref":"b"}}]}"#);
        let back: Expr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
        let t: Expr = serde_json::from_str(r#""true""#).unwrap();
        assert_eq!(t, Expr::True);
    }
}
