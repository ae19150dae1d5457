//! Metamorphic test-case reduction.
//!
//! A delta-debugging driver over ordered passes. Each pass finds its
//! opportunities, then slides a right-to-left window of halving size over
//! them; a candidate formed by taking the whole window is adopted when the
//! interestingness test accepts it. Candidates that fail to re-resolve are
//! non-interesting by definition.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tracing::debug;

use crate::ast::{
    node_count, visit_children, AugmentedExpression, Expression, NodeRef, Statement,
    TranslationUnit,
};
use crate::augment::{constant_with_value, ShaderJob};
use crate::resolver::{resolve, NodeKey, ResolvedEnvironment};
use crate::rewrite::{Rewriter, StatementAction};
use crate::types::Type;

/// One reversible edit a pass may perform.
#[derive(Clone)]
pub enum Opportunity {
    ReplaceExpression {
        target: NodeKey,
        replacement: Rc<Expression>,
    },
    RemoveStatement {
        target: NodeKey,
    },
    UnwrapControlFlow {
        id: u32,
    },
}

pub trait ReductionPass {
    fn name(&self) -> &'static str;
    fn find_opportunities(&self, job: &ShaderJob, env: &ResolvedEnvironment) -> Vec<Opportunity>;
}

/// The fixed, observable pass order.
pub fn default_passes() -> Vec<Box<dyn ReductionPass>> {
    vec![
        Box::new(UndoIdentityOperations),
        Box::new(ReplaceKnownValues),
        Box::new(RemoveDeadCodeFragments),
        Box::new(UnwrapControlFlow),
        Box::new(ShrinkArbitraryExpressions),
    ]
}

/// Reduces `job` against `test`. Returns `None` when the input itself is
/// not interesting; otherwise the best interesting job plus the closest
/// simpler-but-not-interesting candidate seen since the last adoption.
pub fn reduce<F>(job: &ShaderJob, mut test: F) -> Option<(ShaderJob, Option<ShaderJob>)>
where
    F: FnMut(&ShaderJob) -> bool,
{
    if resolve(&job.tu).is_err() || !test(job) {
        return None;
    }
    let passes = default_passes();
    let mut best = job.clone();
    let mut simpler: Option<(ShaderJob, usize)> = None;

    loop {
        let mut improved = false;
        for pass in &passes {
            if run_pass(pass.as_ref(), &mut best, &mut test, &mut simpler) {
                improved = true;
            }
        }
        if !improved {
            break;
        }
    }

    Some((best, simpler.map(|(job, _)| job)))
}

/// Delta debugging by halving over one pass. Returns whether any candidate
/// was adopted.
fn run_pass<F>(
    pass: &dyn ReductionPass,
    best: &mut ShaderJob,
    test: &mut F,
    simpler: &mut Option<(ShaderJob, usize)>,
) -> bool
where
    F: FnMut(&ShaderJob) -> bool,
{
    let env = match resolve(&best.tu) {
        Ok(env) => env,
        Err(_) => return false,
    };
    let mut opportunities = pass.find_opportunities(best, &env);
    debug!(pass = pass.name(), count = opportunities.len(), "pass start");
    if opportunities.is_empty() {
        return false;
    }

    let mut improved = false;
    let mut granularity = opportunities.len();
    while granularity > 0 {
        let mut offset = opportunities.len().saturating_sub(granularity);
        loop {
            let window = &opportunities[offset..offset + granularity];
            let candidate_tu = apply_opportunities(&best.tu, window);
            let candidate = ShaderJob {
                tu: Rc::new(candidate_tu),
                uniforms: best.uniforms.clone(),
            };
            let candidate_env = resolve(&candidate.tu);
            if candidate_env.is_ok() && test(&candidate) {
                debug!(pass = pass.name(), granularity, offset, "candidate adopted");
                *best = candidate;
                improved = true;
                // The AST changed; the stale hint no longer applies.
                *simpler = None;
                opportunities = pass.find_opportunities(best, &candidate_env.unwrap());
                if opportunities.len() < granularity {
                    granularity = opportunities.len();
                }
                if granularity == 0 {
                    return improved;
                }
                offset = offset.min(opportunities.len() - granularity);
            } else {
                if candidate_env.is_ok() {
                    let best_size = node_count(&best.tu);
                    let candidate_size = node_count(&candidate.tu);
                    if candidate_size < best_size {
                        let delta = best_size - candidate_size;
                        let closer = match simpler {
                            Some((_, existing)) => delta < *existing,
                            None => true,
                        };
                        if closer {
                            *simpler = Some((candidate, delta));
                        }
                    }
                }
                if offset == 0 {
                    break;
                }
                offset = offset.saturating_sub(granularity);
            }
        }
        granularity /= 2;
    }
    improved
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Candidate construction
////////////////////////////////////////////////////////////////////////////////////////////////////

fn apply_opportunities(tu: &TranslationUnit, window: &[Opportunity]) -> TranslationUnit {
    let mut expr_replacements: HashMap<NodeKey, Rc<Expression>> = HashMap::new();
    let mut removed_statements: HashSet<NodeKey> = HashSet::new();
    let mut unwrap_ids: HashSet<u32> = HashSet::new();
    for opportunity in window {
        match opportunity {
            Opportunity::ReplaceExpression {
                target,
                replacement,
            } => {
                expr_replacements.insert(*target, replacement.clone());
            }
            Opportunity::RemoveStatement { target } => {
                removed_statements.insert(*target);
            }
            Opportunity::UnwrapControlFlow { id } => {
                unwrap_ids.insert(*id);
            }
        }
    }

    let mut expression_cb = |expression: &Rc<Expression>| -> Option<Rc<Expression>> {
        expr_replacements
            .get(&NodeKey::of_expression(expression))
            .cloned()
    };
    let mut statement_cb = |statement: &Rc<Statement>| -> Option<StatementAction> {
        if removed_statements.contains(&NodeKey::of_statement(statement)) {
            return Some(StatementAction::Remove);
        }
        match &**statement {
            Statement::ControlFlowWrapper { id, body } if unwrap_ids.contains(id) => {
                let mut originals = Vec::new();
                collect_tagged_statements(body, *id, &mut originals);
                if originals.is_empty() {
                    // Stray wrapper: drop the marker but keep its code.
                    Some(StatementAction::Replace(body.clone()))
                } else {
                    Some(StatementAction::Splice(originals))
                }
            }
            Statement::ControlFlowWrapReturn { id, .. }
            | Statement::ControlFlowWrapHelperStatement { id, .. }
                if unwrap_ids.contains(id) =>
            {
                Some(StatementAction::Remove)
            }
            _ => None,
        }
    };

    let mut rewriter = Rewriter {
        expression: Some(&mut expression_cb),
        statement: Some(&mut statement_cb),
        flatten_unmarked_compounds: !unwrap_ids.is_empty(),
    };
    rewriter.rewrite_unit(tu)
}

/// The originally wrapped statements: contents of compounds tagged with
/// the wrapper id, in source order.
fn collect_tagged_statements(statement: &Rc<Statement>, id: u32, out: &mut Vec<Rc<Statement>>) {
    if let Statement::Compound(compound) = &**statement {
        if compound.metadata.contains(&id) {
            out.extend(compound.statements.iter().cloned());
            return;
        }
    }
    match &**statement {
        Statement::Compound(compound) => {
            for s in &compound.statements {
                collect_tagged_statements(s, id, out);
            }
        }
        Statement::If {
            then_branch,
            else_branch,
            ..
        } => {
            collect_tagged_statements(then_branch, id, out);
            if let Some(else_branch) = else_branch {
                collect_tagged_statements(else_branch, id, out);
            }
        }
        Statement::Loop { body, continuing } => {
            for s in body {
                collect_tagged_statements(s, id, out);
            }
            if let Some(continuing) = continuing {
                for s in &continuing.statements {
                    collect_tagged_statements(s, id, out);
                }
            }
        }
        Statement::For { body, .. } | Statement::While { body, .. } => {
            collect_tagged_statements(body, id, out);
        }
        Statement::Switch { clauses, .. } => {
            for clause in clauses {
                collect_tagged_statements(&clause.body, id, out);
            }
        }
        Statement::DeadCodeFragment { body }
        | Statement::ControlFlowWrapper { body, .. }
        | Statement::ControlFlowWrapReturn { body, .. }
        | Statement::ControlFlowWrapHelperStatement { body, .. } => {
            collect_tagged_statements(body, id, out);
        }
        _ => {}
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Walking
////////////////////////////////////////////////////////////////////////////////////////////////////

fn walk<F: FnMut(NodeRef<'_>)>(node: NodeRef<'_>, f: &mut F) {
    f(node);
    visit_children(&mut |child, state: &mut F| walk(child, state), node, f);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Passes
////////////////////////////////////////////////////////////////////////////////////////////////////

struct UndoIdentityOperations;

impl ReductionPass for UndoIdentityOperations {
    fn name(&self) -> &'static str {
        "undo-identity-operations"
    }

    fn find_opportunities(&self, job: &ShaderJob, _env: &ResolvedEnvironment) -> Vec<Opportunity> {
        let mut out = Vec::new();
        walk(NodeRef::TranslationUnit(&job.tu), &mut |node| {
            if let NodeRef::Expression(e) = node {
                if let Expression::Augmented(augmented) = e {
                    let original = match augmented {
                        AugmentedExpression::AddZero { original, .. }
                        | AugmentedExpression::SubZero { original, .. }
                        | AugmentedExpression::MulOne { original, .. }
                        | AugmentedExpression::DivOne { original, .. }
                        | AugmentedExpression::IdentityOperation { original, .. } => original,
                        _ => return,
                    };
                    out.push(Opportunity::ReplaceExpression {
                        target: NodeKey::of_expression(e),
                        replacement: original.clone(),
                    });
                }
            }
        });
        out
    }
}

struct ReplaceKnownValues;

impl ReductionPass for ReplaceKnownValues {
    fn name(&self) -> &'static str {
        "replace-known-values"
    }

    fn find_opportunities(&self, job: &ShaderJob, _env: &ResolvedEnvironment) -> Vec<Opportunity> {
        let mut out = Vec::new();
        walk(NodeRef::TranslationUnit(&job.tu), &mut |node| {
            if let NodeRef::Expression(e) = node {
                if let Expression::Augmented(AugmentedExpression::KnownValue { value, .. }) = e {
                    out.push(Opportunity::ReplaceExpression {
                        target: NodeKey::of_expression(e),
                        replacement: value.clone(),
                    });
                }
            }
        });
        out
    }
}

struct RemoveDeadCodeFragments;

impl ReductionPass for RemoveDeadCodeFragments {
    fn name(&self) -> &'static str {
        "remove-dead-code-fragments"
    }

    fn find_opportunities(&self, job: &ShaderJob, _env: &ResolvedEnvironment) -> Vec<Opportunity> {
        let mut out = Vec::new();
        walk(NodeRef::TranslationUnit(&job.tu), &mut |node| {
            if let NodeRef::Statement(s) = node {
                if matches!(s, Statement::DeadCodeFragment { .. }) {
                    out.push(Opportunity::RemoveStatement {
                        target: NodeKey::of_statement(s),
                    });
                }
            }
        });
        out
    }
}

struct UnwrapControlFlow;

impl ReductionPass for UnwrapControlFlow {
    fn name(&self) -> &'static str {
        "unwrap-control-flow"
    }

    fn find_opportunities(&self, job: &ShaderJob, _env: &ResolvedEnvironment) -> Vec<Opportunity> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        walk(NodeRef::TranslationUnit(&job.tu), &mut |node| {
            if let NodeRef::Statement(s) = node {
                let id = match s {
                    Statement::ControlFlowWrapper { id, .. }
                    | Statement::ControlFlowWrapReturn { id, .. }
                    | Statement::ControlFlowWrapHelperStatement { id, .. } => *id,
                    _ => return,
                };
                if seen.insert(id) {
                    out.push(Opportunity::UnwrapControlFlow { id });
                }
            }
        });
        out
    }
}

struct ShrinkArbitraryExpressions;

impl ReductionPass for ShrinkArbitraryExpressions {
    fn name(&self) -> &'static str {
        "shrink-arbitrary-expressions"
    }

    fn find_opportunities(&self, job: &ShaderJob, env: &ResolvedEnvironment) -> Vec<Opportunity> {
        let mut out = Vec::new();
        walk(NodeRef::TranslationUnit(&job.tu), &mut |node| {
            let e = match node {
                NodeRef::Expression(e) => e,
                _ => return,
            };
            let inner = match e {
                Expression::Augmented(AugmentedExpression::ArbitraryExpression(inner)) => inner,
                _ => return,
            };
            let store_type = match env.type_of(e) {
                Some(ty) => ty.clone(),
                None => return,
            };
            let target = NodeKey::of_expression(e);
            shrink_opportunities(env, target, inner, &store_type, &mut out);
        });
        out
    }
}

fn shrink_opportunities(
    env: &ResolvedEnvironment,
    target: NodeKey,
    inner: &Rc<Expression>,
    store_type: &Type,
    out: &mut Vec<Opportunity>,
) {
    let constant = || {
        constant_with_value(1, store_type).map(|replacement| Opportunity::ReplaceExpression {
            target,
            replacement,
        })
    };
    let keep_marked = |picked: &Rc<Expression>| Opportunity::ReplaceExpression {
        target,
        replacement: Rc::new(Expression::Augmented(
            AugmentedExpression::ArbitraryExpression(picked.clone()),
        )),
    };

    match &**inner {
        // Leaves and value constructors shrink straight to the typed
        // constant.
        Expression::BoolLiteral(_)
        | Expression::IntLiteral(_)
        | Expression::FloatLiteral(_)
        | Expression::Identifier(_)
        | Expression::TypeConstructor { .. } => {
            out.extend(constant());
        }
        Expression::Binary { lhs, rhs, .. } => {
            let mut found = false;
            if env.type_of(lhs) == Some(store_type) {
                out.push(keep_marked(lhs));
                found = true;
            }
            if env.type_of(rhs) == Some(store_type) {
                out.push(keep_marked(rhs));
                found = true;
            }
            if !found {
                out.extend(constant());
            }
        }
        Expression::FunctionCall { arguments, .. } => {
            if arguments.is_empty() {
                out.extend(constant());
            } else {
                for argument in arguments {
                    if env.type_of(argument) == Some(store_type) {
                        out.push(keep_marked(argument));
                    } else {
                        out.extend(constant());
                    }
                }
            }
        }
        _ => {
            out.extend(constant());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::UniformSnapshot;
    use crate::parser::parse;

    fn plain_job(src: &str) -> ShaderJob {
        ShaderJob {
            tu: Rc::new(parse(src).unwrap()),
            uniforms: UniformSnapshot::default(),
        }
    }

    #[test]
    fn uninteresting_input_returns_none() {
        let job = plain_job("fn f() { }");
        assert!(reduce(&job, |_| false).is_none());
    }

    #[test]
    fn no_opportunities_returns_input_unchanged() {
        let job = plain_job("fn f() -> i32 { return 3; }");
        let (best, simpler) = reduce(&job, |_| true).unwrap();
        assert!(Rc::ptr_eq(&best.tu, &job.tu));
        assert!(simpler.is_none());
    }

    #[test]
    fn unresolvable_candidates_are_never_interesting() {
        // The test closure must only ever see candidates that resolve;
        // the driver filters the rest.
        let job = plain_job("fn f() -> i32 { return 7; }");
        let (best, _) = reduce(&job, |candidate| {
            assert!(resolve(&candidate.tu).is_ok());
            true
        })
        .unwrap();
        assert!(resolve(&best.tu).is_ok());
    }
}
