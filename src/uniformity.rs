//! Uniformity analysis.
//!
//! Builds, per function, a directed graph over control-flow and value
//! nodes, then classifies the function with call-site / parameter / return
//! tags by reachability from the required-to-be-uniform nodes at three
//! severities. The graph is cyclic (loops); nodes live in an index arena
//! and edges point from dependent to dependency.

use indexmap::IndexMap;
use smallvec::SmallVec;
use smol_str::SmolStr;
use std::fmt::Write as _;
use std::io::Write;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::ast::{
    AugmentedExpression, CaseSelectors, Expression, FunctionDecl, GlobalDecl, LhsExpression,
    Statement, TranslationUnit,
};
use crate::behaviour::{sequence_behaviours, statement_behaviours, Behaviours};
use crate::builtins::{self, CallUniformity};
use crate::error::{Error, Result, Severity};
use crate::resolver::{ResolvedEnvironment, Scope, ScopeEntry};

/// Builtin values that are never uniform across an invocation group.
const NON_UNIFORM_BUILTIN_VALUES: &[&str] = &[
    "vertex_index",
    "instance_index",
    "clip_distances",
    "position",
    "front_facing",
    "frag_depth",
    "sample_index",
    "sample_mask",
    "local_invocation_id",
    "local_invocation_index",
    "global_invocation_id",
    "subgroup_invocation_id",
];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CallSiteTag {
    NoRestriction,
    RequiredToBeUniform(Severity),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParameterTag {
    NoRestriction,
    ParameterRequiredToBeUniform(Severity),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParameterReturnTag {
    NoRestriction,
    ParameterContentsRequiredToBeUniform,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FunctionTag {
    NoRestriction,
    ReturnValueMayBeNonUniform,
}

/// The per-function result of the analysis.
#[derive(Clone, Debug)]
pub struct FunctionTags {
    pub call_site: CallSiteTag,
    pub parameters: Vec<ParameterTag>,
    pub parameter_returns: Vec<ParameterReturnTag>,
    pub function_tag: FunctionTag,
}

impl FunctionTags {
    pub fn call_site_must_be_uniform(&self) -> bool {
        matches!(self.call_site, CallSiteTag::RequiredToBeUniform(_))
    }

    pub fn parameter_must_be_uniform(&self, index: usize) -> bool {
        matches!(
            self.parameters.get(index),
            Some(ParameterTag::ParameterRequiredToBeUniform(_))
        )
    }
}

/// A Warning/Info-severity finding; Error-severity findings abort the
/// analysis instead.
#[derive(Clone, Debug)]
pub struct UniformityDiagnostic {
    pub severity: Severity,
    pub function: SmolStr,
    pub message: String,
}

pub struct UniformityOptions {
    /// Severity of the derivative / texture-sampling / subgroup family;
    /// stands in for WGSL diagnostic filters.
    pub derivative_severity: Severity,
    /// Optional sink for the graph in DOT form. Must be shared behind a
    /// mutex so parallel shader jobs can funnel through one writer.
    pub dot: Option<Arc<Mutex<dyn Write + Send>>>,
}

impl Default for UniformityOptions {
    fn default() -> Self {
        UniformityOptions {
            derivative_severity: Severity::Error,
            dot: None,
        }
    }
}

pub struct UniformityAnalysis {
    tags: IndexMap<SmolStr, FunctionTags>,
    pub diagnostics: Vec<UniformityDiagnostic>,
}

impl UniformityAnalysis {
    pub fn tags(&self, function: &str) -> Option<&FunctionTags> {
        self.tags.get(function)
    }
}

pub fn analyze(tu: &TranslationUnit, env: &ResolvedEnvironment) -> Result<UniformityAnalysis> {
    analyze_with_options(tu, env, &UniformityOptions::default())
}

/// Analyzes every function in call-graph order, so callee tags are known
/// at each call site.
pub fn analyze_with_options(
    tu: &TranslationUnit,
    env: &ResolvedEnvironment,
    options: &UniformityOptions,
) -> Result<UniformityAnalysis> {
    let mut functions: IndexMap<SmolStr, &Rc<FunctionDecl>> = IndexMap::new();
    for decl in &tu.declarations {
        if let GlobalDecl::Function(f) = &**decl {
            functions.insert(f.name.clone(), f);
        }
    }

    let mut analysis = UniformityAnalysis {
        tags: IndexMap::new(),
        diagnostics: Vec::new(),
    };
    let mut dot = options
        .dot
        .as_ref()
        .map(|_| String::from("digraph uniformity {\n  rankdir=BT;\n"));

    for name in env.function_order() {
        let function = match functions.get(name) {
            Some(f) => *f,
            None => continue,
        };
        let mut analyzer = FunctionAnalyzer::new(function, env, &analysis.tags, options);
        analyzer.build()?;
        if let Some(buf) = &mut dot {
            analyzer.write_dot(buf);
        }
        let tags = analyzer.infer_tags(&mut analysis.diagnostics)?;
        debug!(function = %name, ?tags, "uniformity tags");
        analysis.tags.insert(name.clone(), tags);
    }

    if let (Some(mut buf), Some(sink)) = (dot, options.dot.as_ref()) {
        buf.push_str("}\n");
        let mut writer = sink.lock().expect("dot writer poisoned");
        writer
            .write_all(buf.as_bytes())
            .map_err(|e| Error::ResolverInternal(format!("dot output failed: {}", e)))?;
    }

    Ok(analysis)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct NodeIndex(u32);

struct Node {
    name: String,
    edges: SmallVec<[NodeIndex; 2]>,
}

#[derive(Default)]
struct LoopInfo {
    break_values: Vec<IndexMap<SmolStr, NodeIndex>>,
    break_cfs: Vec<NodeIndex>,
    continue_values: Vec<IndexMap<SmolStr, NodeIndex>>,
}

enum Breakable {
    Loop(LoopInfo),
    Switch,
}

struct FunctionAnalyzer<'a> {
    function: &'a FunctionDecl,
    env: &'a ResolvedEnvironment,
    known_tags: &'a IndexMap<SmolStr, FunctionTags>,
    options: &'a UniformityOptions,
    nodes: Vec<Node>,
    required: [NodeIndex; 3],
    may_be_non_uniform: NodeIndex,
    cf_start: NodeIndex,
    value_return: Option<NodeIndex>,
    param_nodes: Vec<NodeIndex>,
    /// Current value node per in-scope variable (parameters included).
    vars: IndexMap<SmolStr, NodeIndex>,
    breakables: Vec<Breakable>,
}

impl<'a> FunctionAnalyzer<'a> {
    fn new(
        function: &'a FunctionDecl,
        env: &'a ResolvedEnvironment,
        known_tags: &'a IndexMap<SmolStr, FunctionTags>,
        options: &'a UniformityOptions,
    ) -> FunctionAnalyzer<'a> {
        let mut analyzer = FunctionAnalyzer {
            function,
            env,
            known_tags,
            options,
            nodes: Vec::new(),
            required: [NodeIndex(0); 3],
            may_be_non_uniform: NodeIndex(0),
            cf_start: NodeIndex(0),
            value_return: None,
            param_nodes: Vec::new(),
            vars: IndexMap::new(),
            breakables: Vec::new(),
        };
        analyzer.required = [
            analyzer.node("RequiredToBeUniform_Error"),
            analyzer.node("RequiredToBeUniform_Warning"),
            analyzer.node("RequiredToBeUniform_Info"),
        ];
        analyzer.may_be_non_uniform = analyzer.node("MayBeNonUniform");
        analyzer.cf_start = analyzer.node("CFStart");
        if function.return_type.is_some() {
            analyzer.value_return = Some(analyzer.node("ValueReturn"));
        }
        for param in &function.parameters {
            let node = analyzer.node(format!("param_{}", param.name));
            analyzer.param_nodes.push(node);
            analyzer.vars.insert(param.name.clone(), node);
        }
        analyzer
    }

    fn node(&mut self, name: impl Into<String>) -> NodeIndex {
        let index = NodeIndex(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.into(),
            edges: SmallVec::new(),
        });
        index
    }

    fn edge(&mut self, from: NodeIndex, to: NodeIndex) {
        let edges = &mut self.nodes[from.0 as usize].edges;
        if !edges.contains(&to) {
            edges.push(to);
        }
    }

    fn required_node(&self, severity: Severity) -> NodeIndex {
        match severity {
            Severity::Error => self.required[0],
            Severity::Warning => self.required[1],
            Severity::Info => self.required[2],
        }
    }

    fn build(&mut self) -> Result<()> {
        let body = self.function.body.clone();
        let cf = self.cf_start;
        self.statement(cf, &body)?;
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Statements
    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn scope_of(&self, statement: &Statement) -> Result<Rc<Scope>> {
        self.env
            .scope_before(statement)
            .cloned()
            .ok_or_else(|| Error::ResolverInternal("statement missing a scope".to_string()))
    }

    fn statement_list(&mut self, mut cf: NodeIndex, statements: &[Rc<Statement>]) -> Result<NodeIndex> {
        for statement in statements {
            cf = self.statement(cf, statement)?;
            if !statement_behaviours(statement).contains(Behaviours::NEXT) {
                break;
            }
        }
        Ok(cf)
    }

    fn statement(&mut self, cf: NodeIndex, statement: &Rc<Statement>) -> Result<NodeIndex> {
        let scope = self.scope_of(statement)?;
        match &**statement {
            Statement::Compound(compound) => self.statement_list(cf, &compound.statements),
            Statement::Empty | Statement::ConstAssert { .. } => Ok(cf),
            Statement::ValueDecl {
                name, initializer, ..
            } => {
                let (_, value) = self.expression(cf, initializer, &scope)?;
                self.vars.insert(name.clone(), value);
                Ok(cf)
            }
            Statement::Variable {
                name, initializer, ..
            } => {
                let value = match initializer {
                    Some(init) => self.expression(cf, init, &scope)?.1,
                    // Zero-initialized; uniform until assigned.
                    None => self.node(format!("{}_zero", name)),
                };
                self.vars.insert(name.clone(), value);
                Ok(cf)
            }
            Statement::Assignment { lhs, rhs, .. } => {
                match lhs {
                    None => {
                        self.expression(cf, rhs, &scope)?;
                    }
                    Some(lhs) => {
                        let (deps, root, plain) = self.lhs_dependencies(cf, lhs, &scope)?;
                        let (_, rv) = self.expression(cf, rhs, &scope)?;
                        let lv = self.node(format!("assign_{}", root));
                        self.edge(lv, rv);
                        for dep in deps {
                            self.edge(lv, dep);
                        }
                        if !plain {
                            // Partial updates keep a dependency on the old
                            // contents.
                            if let Some(&old) = self.vars.get(&root) {
                                self.edge(lv, old);
                            }
                        }
                        if self.vars.contains_key(&root) {
                            self.vars.insert(root, lv);
                        }
                    }
                }
                Ok(cf)
            }
            Statement::Increment { target } | Statement::Decrement { target } => {
                let (deps, root, _plain) = self.lhs_dependencies(cf, target, &scope)?;
                let lv = self.node(format!("step_{}", root));
                for dep in deps {
                    self.edge(lv, dep);
                }
                if let Some(&old) = self.vars.get(&root) {
                    self.edge(lv, old);
                    self.vars.insert(root, lv);
                }
                Ok(cf)
            }
            Statement::FunctionCall {
                callee, arguments, ..
            } => {
                let (cf, _) = self.call(cf, callee, arguments, &scope)?;
                Ok(cf)
            }
            Statement::Return { expression } => {
                if let Some(expression) = expression {
                    let (cf_out, value) = self.expression(cf, expression, &scope)?;
                    if let Some(value_return) = self.value_return {
                        self.edge(value_return, value);
                        self.edge(value_return, cf_out);
                    }
                }
                Ok(cf)
            }
            Statement::Discard => Ok(cf),
            Statement::Break => {
                // `break` targets the innermost breakable construct;
                // clause-end merging covers switch breaks.
                let snapshot = self.vars.clone();
                if let Some(Breakable::Loop(info)) = self.breakables.last_mut() {
                    info.break_values.push(snapshot);
                    info.break_cfs.push(cf);
                }
                Ok(cf)
            }
            Statement::Continue => {
                let snapshot = self.vars.clone();
                if let Some(index) = self
                    .breakables
                    .iter()
                    .rposition(|b| matches!(b, Breakable::Loop(_)))
                {
                    if let Breakable::Loop(info) = &mut self.breakables[index] {
                        info.continue_values.push(snapshot);
                    }
                }
                Ok(cf)
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let (_, condition_value) = self.expression(cf, condition, &scope)?;
                let saved = self.vars.clone();

                // Both branches start from the condition's value node.
                let cf_then = self.statement(condition_value, then_branch)?;
                let then_vars = std::mem::replace(&mut self.vars, saved.clone());
                let then_b = statement_behaviours(then_branch);

                let (cf_else, else_vars, else_b) = match else_branch {
                    Some(else_branch) => {
                        let cf_else = self.statement(condition_value, else_branch)?;
                        let else_vars = std::mem::replace(&mut self.vars, saved.clone());
                        (cf_else, else_vars, statement_behaviours(else_branch))
                    }
                    None => (condition_value, saved.clone(), Behaviours::NEXT),
                };

                let names: Vec<SmolStr> = saved.keys().cloned().collect();
                for name in names {
                    let merge = self.node(format!("{}_merge", name));
                    if then_b.contains(Behaviours::NEXT) {
                        if let Some(&v) = then_vars.get(&name) {
                            self.edge(merge, v);
                        }
                    }
                    if else_b.contains(Behaviours::NEXT) {
                        if let Some(&v) = else_vars.get(&name) {
                            self.edge(merge, v);
                        }
                    }
                    self.vars.insert(name, merge);
                }

                if statement_behaviours(statement).is_exactly_next() {
                    Ok(cf)
                } else {
                    let merge = self.node("if_merge");
                    self.edge(merge, cf_then);
                    self.edge(merge, cf_else);
                    Ok(merge)
                }
            }
            Statement::Switch { selector, clauses } => {
                let (_, selector_value) = self.expression(cf, selector, &scope)?;
                let saved = self.vars.clone();
                self.breakables.push(Breakable::Switch);
                let mut ends = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    if let CaseSelectors::Expressions(exprs) = &clause.selectors {
                        for e in exprs.iter().flatten() {
                            self.expression(cf, e, &scope)?;
                        }
                    }
                    self.vars = saved.clone();
                    let clause_cf = self.statement(selector_value, &clause.body)?;
                    let clause_vars = self.vars.clone();
                    ends.push((clause_cf, clause_vars, statement_behaviours(&clause.body)));
                }
                self.breakables.pop();

                self.vars = saved.clone();
                let names: Vec<SmolStr> = saved.keys().cloned().collect();
                for name in names {
                    let merge = self.node(format!("{}_switch_merge", name));
                    for (_, clause_vars, b) in &ends {
                        if b.contains(Behaviours::NEXT) || b.contains(Behaviours::BREAK) {
                            if let Some(&v) = clause_vars.get(&name) {
                                self.edge(merge, v);
                            }
                        }
                    }
                    self.vars.insert(name, merge);
                }

                if statement_behaviours(statement).is_exactly_next() {
                    Ok(cf)
                } else {
                    let merge = self.node("switch_merge");
                    for (clause_cf, _, _) in &ends {
                        let clause_cf = *clause_cf;
                        self.edge(merge, clause_cf);
                    }
                    Ok(merge)
                }
            }
            Statement::Loop { body, continuing } => {
                self.breakables.push(Breakable::Loop(LoopInfo::default()));
                let cf_loop = self.node("loop_start");
                let pre_values = self.vars.clone();
                let mut entry_values = IndexMap::new();
                let names: Vec<SmolStr> = pre_values.keys().cloned().collect();
                for name in &names {
                    let entry = self.node(format!("{}_loop_in", name));
                    entry_values.insert(name.clone(), entry);
                    self.vars.insert(name.clone(), entry);
                }

                let cf_body = self.statement_list(cf_loop, body)?;
                let body_b = sequence_behaviours(body);

                // Continuing-entry merge: continue sites plus the body's
                // fall-through values.
                let continues = match self.breakables.last_mut() {
                    Some(Breakable::Loop(info)) => std::mem::take(&mut info.continue_values),
                    _ => Vec::new(),
                };
                for name in &names {
                    let entry = self.node(format!("{}_continue", name));
                    for snapshot in &continues {
                        if let Some(&v) = snapshot.get(name) {
                            self.edge(entry, v);
                        }
                    }
                    if body_b.contains(Behaviours::NEXT) {
                        if let Some(v) = self.vars.get(name).copied() {
                            self.edge(entry, v);
                        }
                    }
                    self.vars.insert(name.clone(), entry);
                }

                let mut cf_continuing = cf_body;
                if let Some(continuing) = continuing {
                    cf_continuing = self.statement_list(cf_continuing, &continuing.statements)?;
                    if let Some(break_if) = &continuing.break_if {
                        // The break-if has no statement of its own; borrow
                        // the nearest recorded scope.
                        let break_if_scope = continuing
                            .statements
                            .last()
                            .or_else(|| body.last())
                            .and_then(|s| self.env.scope_before(s).cloned())
                            .unwrap_or_else(|| scope.clone());
                        let (_, value) = self.expression(cf_continuing, break_if, &break_if_scope)?;
                        // A break-if is a break site with the condition's
                        // value as its cf.
                        let snapshot = self.vars.clone();
                        if let Some(Breakable::Loop(info)) = self.breakables.last_mut() {
                            info.break_values.push(snapshot);
                            info.break_cfs.push(value);
                        }
                        cf_continuing = value;
                    }
                }

                self.edge(cf_loop, cf);
                self.edge(cf_loop, cf_continuing);
                for name in &names {
                    let entry = entry_values[name];
                    self.edge(entry, pre_values[name]);
                    let end = self.vars[name];
                    self.edge(entry, end);
                }

                let info = match self.breakables.pop() {
                    Some(Breakable::Loop(info)) => info,
                    _ => LoopInfo::default(),
                };

                if !info.break_values.is_empty() {
                    for name in &names {
                        let exit = self.node(format!("{}_exit", name));
                        for snapshot in &info.break_values {
                            if let Some(&v) = snapshot.get(name) {
                                self.edge(exit, v);
                            }
                        }
                        self.vars.insert(name.clone(), exit);
                    }
                } else {
                    self.vars = pre_values;
                }

                if statement_behaviours(statement).is_exactly_next() {
                    Ok(cf)
                } else {
                    let merge = self.node("loop_merge");
                    for break_cf in &info.break_cfs {
                        let break_cf = *break_cf;
                        self.edge(merge, break_cf);
                    }
                    Ok(merge)
                }
            }
            Statement::While { condition, body } => {
                self.analyze_condition_loop(cf, statement, Some(condition), None, body, &scope)
            }
            Statement::For {
                initializer,
                condition,
                update,
                body,
            } => {
                let mut cf = cf;
                if let Some(init) = initializer {
                    cf = self.statement(cf, init)?;
                }
                self.analyze_condition_loop(
                    cf,
                    statement,
                    condition.as_ref(),
                    update.as_ref(),
                    body,
                    &scope,
                )
            }
            Statement::DeadCodeFragment { body }
            | Statement::ControlFlowWrapper { body, .. }
            | Statement::ControlFlowWrapReturn { body, .. }
            | Statement::ControlFlowWrapHelperStatement { body, .. } => self.statement(cf, body),
        }
    }

    /// Shared core of `while` and `for`, which desugar to `loop` with the
    /// condition test at the top and the update in the continuing block.
    fn analyze_condition_loop(
        &mut self,
        cf: NodeIndex,
        statement: &Rc<Statement>,
        condition: Option<&Rc<Expression>>,
        update: Option<&Rc<Statement>>,
        body: &Rc<Statement>,
        scope: &Rc<Scope>,
    ) -> Result<NodeIndex> {
        self.breakables.push(Breakable::Loop(LoopInfo::default()));
        let cf_loop = self.node("loop_start");
        let pre_values = self.vars.clone();
        let names: Vec<SmolStr> = pre_values.keys().cloned().collect();
        let mut entry_values = IndexMap::new();
        for name in &names {
            let entry = self.node(format!("{}_loop_in", name));
            entry_values.insert(name.clone(), entry);
            self.vars.insert(name.clone(), entry);
        }

        let mut cf_body_entry = cf_loop;
        if let Some(condition) = condition {
            // The loop header shares scope with the body, so a condition
            // that reads a header-declared variable resolves through the
            // body's recorded scope.
            let cond_scope = self.scope_of(body).unwrap_or_else(|_| scope.clone());
            let (_, condition_value) = self.expression(cf_loop, condition, &cond_scope)?;
            // The implicit `break` when the condition fails.
            let snapshot = self.vars.clone();
            if let Some(Breakable::Loop(info)) = self.breakables.last_mut() {
                info.break_values.push(snapshot);
                info.break_cfs.push(condition_value);
            }
            cf_body_entry = condition_value;
        }

        let mut cf_body = self.statement(cf_body_entry, body)?;
        let body_b = statement_behaviours(body);

        let continues = match self.breakables.last_mut() {
            Some(Breakable::Loop(info)) => std::mem::take(&mut info.continue_values),
            _ => Vec::new(),
        };
        for name in &names {
            let entry = self.node(format!("{}_continue", name));
            for snapshot in &continues {
                if let Some(&v) = snapshot.get(name) {
                    self.edge(entry, v);
                }
            }
            if body_b.contains(Behaviours::NEXT) {
                let end = self.vars[name];
                self.edge(entry, end);
            }
            self.vars.insert(name.clone(), entry);
        }

        if let Some(update) = update {
            cf_body = self.statement(cf_body, update)?;
        }

        self.edge(cf_loop, cf);
        self.edge(cf_loop, cf_body);
        for name in &names {
            let entry = entry_values[name];
            self.edge(entry, pre_values[name]);
            let end = self.vars[name];
            self.edge(entry, end);
        }

        let info = match self.breakables.pop() {
            Some(Breakable::Loop(info)) => info,
            _ => LoopInfo::default(),
        };

        if !info.break_values.is_empty() {
            for name in &names {
                let exit = self.node(format!("{}_exit", name));
                for snapshot in &info.break_values {
                    if let Some(&v) = snapshot.get(name) {
                        self.edge(exit, v);
                    }
                }
                self.vars.insert(name.clone(), exit);
            }
        } else {
            self.vars = pre_values;
        }

        if statement_behaviours(statement).is_exactly_next() {
            Ok(cf)
        } else {
            let merge = self.node("loop_merge");
            for break_cf in &info.break_cfs {
                let break_cf = *break_cf;
                self.edge(merge, break_cf);
            }
            Ok(merge)
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Expressions
    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Threads `(cf, value)` through an expression; `cf` is returned
    /// unchanged except where the rules say otherwise.
    fn expression(
        &mut self,
        cf: NodeIndex,
        expression: &Rc<Expression>,
        scope: &Rc<Scope>,
    ) -> Result<(NodeIndex, NodeIndex)> {
        match &**expression {
            Expression::BoolLiteral(_)
            | Expression::IntLiteral(_)
            | Expression::FloatLiteral(_) => Ok((cf, cf)),
            Expression::Identifier(name) => Ok((cf, self.identifier_value(cf, name, scope))),
            Expression::Paren(inner) => self.expression(cf, inner, scope),
            Expression::Unary { operand, .. } => self.expression(cf, operand, scope),
            Expression::Binary { operator, lhs, rhs } => {
                if operator.is_short_circuit() {
                    let (_, v1) = self.expression(cf, lhs, scope)?;
                    // The right operand only evaluates when the left one
                    // allows; it runs under the left value's control flow.
                    let (_, v2) = self.expression(v1, rhs, scope)?;
                    Ok((cf, v2))
                } else {
                    let (_, v1) = self.expression(cf, lhs, scope)?;
                    let (_, v2) = self.expression(cf, rhs, scope)?;
                    let value = self.node(format!("{}", operator));
                    self.edge(value, v1);
                    self.edge(value, v2);
                    Ok((cf, value))
                }
            }
            Expression::Member { base, .. } => self.expression(cf, base, scope),
            Expression::Index { base, index } => {
                let (_, v_base) = self.expression(cf, base, scope)?;
                let (_, v_index) = self.expression(cf, index, scope)?;
                let value = self.node("index");
                self.edge(value, v_base);
                self.edge(value, v_index);
                Ok((cf, value))
            }
            Expression::FunctionCall {
                callee, arguments, ..
            } => self.call(cf, callee, arguments, scope),
            Expression::TypeConstructor { arguments, .. } => {
                let mut values = Vec::with_capacity(arguments.len());
                for arg in arguments {
                    values.push(self.expression(cf, arg, scope)?.1);
                }
                let value = self.node("construct");
                if values.is_empty() {
                    self.edge(value, cf);
                } else {
                    for v in values {
                        self.edge(value, v);
                    }
                }
                Ok((cf, value))
            }
            Expression::Augmented(augmented) => match augmented {
                AugmentedExpression::AddZero { original, zero, .. }
                | AugmentedExpression::SubZero { original, zero } => {
                    self.augmented_binary(cf, original, zero, scope)
                }
                AugmentedExpression::MulOne { original, one, .. }
                | AugmentedExpression::DivOne { original, one } => {
                    self.augmented_binary(cf, original, one, scope)
                }
                AugmentedExpression::KnownValue { expression, .. } => {
                    // Only the obfuscated form is executed.
                    self.expression(cf, expression, scope)
                }
                AugmentedExpression::IdentityOperation { replacement, .. } => {
                    self.expression(cf, replacement, scope)
                }
                AugmentedExpression::FalseByConstruction(inner)
                | AugmentedExpression::TrueByConstruction(inner)
                | AugmentedExpression::ArbitraryExpression(inner) => {
                    self.expression(cf, inner, scope)
                }
            },
        }
    }

    fn augmented_binary(
        &mut self,
        cf: NodeIndex,
        a: &Rc<Expression>,
        b: &Rc<Expression>,
        scope: &Rc<Scope>,
    ) -> Result<(NodeIndex, NodeIndex)> {
        let (_, v1) = self.expression(cf, a, scope)?;
        let (_, v2) = self.expression(cf, b, scope)?;
        let value = self.node("identity_op");
        self.edge(value, v1);
        self.edge(value, v2);
        Ok((cf, value))
    }

    fn identifier_value(&mut self, cf: NodeIndex, name: &SmolStr, scope: &Rc<Scope>) -> NodeIndex {
        match scope.lookup(name) {
            Some(ScopeEntry::Parameter { builtin, .. }) => {
                if let Some(builtin) = builtin {
                    if NON_UNIFORM_BUILTIN_VALUES.contains(&builtin.as_str()) {
                        return self.may_be_non_uniform;
                    }
                }
                self.load_value(cf, name)
            }
            Some(ScopeEntry::LocalValue { .. }) | Some(ScopeEntry::LocalVariable { .. }) => {
                self.load_value(cf, name)
            }
            Some(ScopeEntry::GlobalVariable { access, .. }) => {
                if matches!(
                    access,
                    crate::types::AccessMode::Write | crate::types::AccessMode::ReadWrite
                ) {
                    self.may_be_non_uniform
                } else {
                    // Read-only module state is uniform.
                    self.node(format!("uniform_{}", name))
                }
            }
            Some(ScopeEntry::GlobalConstant { .. }) | Some(ScopeEntry::GlobalOverride { .. }) => {
                self.node(format!("const_{}", name))
            }
            _ => cf,
        }
    }

    /// Load-rule identifier: fresh node depending on the current control
    /// flow and the variable's current value.
    fn load_value(&mut self, cf: NodeIndex, name: &SmolStr) -> NodeIndex {
        let value = self.node(format!("load_{}", name));
        self.edge(value, cf);
        if let Some(&current) = self.vars.get(name) {
            self.edge(value, current);
        }
        value
    }

    /// Value-node dependencies of an assignment target (index expressions
    /// along the path), its root identifier, and whether the target is a
    /// plain identifier.
    fn lhs_dependencies(
        &mut self,
        cf: NodeIndex,
        lhs: &Rc<LhsExpression>,
        scope: &Rc<Scope>,
    ) -> Result<(Vec<NodeIndex>, SmolStr, bool)> {
        match &**lhs {
            LhsExpression::Identifier(name) => Ok((Vec::new(), name.clone(), true)),
            LhsExpression::Paren(inner) => self.lhs_dependencies(cf, inner, scope),
            LhsExpression::Member { base, .. } => {
                let (deps, root, _) = self.lhs_dependencies(cf, base, scope)?;
                Ok((deps, root, false))
            }
            LhsExpression::Index { base, index } => {
                let (mut deps, root, _) = self.lhs_dependencies(cf, base, scope)?;
                let (_, v) = self.expression(cf, index, scope)?;
                deps.push(v);
                Ok((deps, root, false))
            }
            LhsExpression::Deref(inner) | LhsExpression::AddressOf(inner) => {
                let (deps, root, _) = self.lhs_dependencies(cf, inner, scope)?;
                Ok((deps, root, false))
            }
        }
    }

    fn call(
        &mut self,
        cf: NodeIndex,
        callee: &SmolStr,
        arguments: &[Rc<Expression>],
        scope: &Rc<Scope>,
    ) -> Result<(NodeIndex, NodeIndex)> {
        let mut values = Vec::with_capacity(arguments.len());
        for arg in arguments {
            values.push(self.expression(cf, arg, scope)?.1);
        }

        if let Some(tags) = self.known_tags.get(callee) {
            if let CallSiteTag::RequiredToBeUniform(severity) = tags.call_site {
                let required = self.required_node(severity);
                self.edge(required, cf);
            }
            for (index, tag) in tags.parameters.iter().enumerate() {
                if let ParameterTag::ParameterRequiredToBeUniform(severity) = tag {
                    if let Some(&v) = values.get(index) {
                        let required = self.required_node(*severity);
                        self.edge(required, v);
                    }
                }
            }
            let value = if tags.function_tag == FunctionTag::ReturnValueMayBeNonUniform {
                self.may_be_non_uniform
            } else {
                let value = self.node(format!("call_{}", callee));
                self.edge(value, cf);
                for v in &values {
                    let v = *v;
                    self.edge(value, v);
                }
                value
            };
            return Ok((cf, value));
        }

        match builtins::call_uniformity(callee) {
            CallUniformity::Barrier => {
                let required = self.required_node(Severity::Error);
                self.edge(required, cf);
                let value = self.node(format!("call_{}", callee));
                self.edge(value, cf);
                for v in values {
                    self.edge(value, v);
                }
                Ok((cf, value))
            }
            CallUniformity::Derivative => {
                let required = self.required_node(self.options.derivative_severity);
                self.edge(required, cf);
                Ok((cf, self.may_be_non_uniform))
            }
            CallUniformity::None => {
                let value = self.node(format!("call_{}", callee));
                if values.is_empty() {
                    self.edge(value, cf);
                } else {
                    for v in values {
                        self.edge(value, v);
                    }
                }
                Ok((cf, value))
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Tag inference
    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Breadth-first reachability that refuses to re-enter nodes visited
    /// by an earlier sweep; returns the nodes newly visited.
    fn sweep(&self, start: NodeIndex, visited: &mut [bool]) -> Vec<NodeIndex> {
        let mut reached = Vec::new();
        let mut queue = std::collections::VecDeque::new();
        if !visited[start.0 as usize] {
            visited[start.0 as usize] = true;
            reached.push(start);
            queue.push_back(start);
        }
        while let Some(current) = queue.pop_front() {
            for &next in &self.nodes[current.0 as usize].edges {
                if !visited[next.0 as usize] {
                    visited[next.0 as usize] = true;
                    reached.push(next);
                    queue.push_back(next);
                }
            }
        }
        reached
    }

    fn infer_tags(&self, diagnostics: &mut Vec<UniformityDiagnostic>) -> Result<FunctionTags> {
        let mut tags = FunctionTags {
            call_site: CallSiteTag::NoRestriction,
            parameters: vec![ParameterTag::NoRestriction; self.param_nodes.len()],
            parameter_returns: vec![ParameterReturnTag::NoRestriction; self.param_nodes.len()],
            function_tag: FunctionTag::NoRestriction,
        };

        let mut visited = vec![false; self.nodes.len()];
        for severity in [Severity::Error, Severity::Warning, Severity::Info] {
            let reached = self.sweep(self.required_node(severity), &mut visited);
            if reached.contains(&self.may_be_non_uniform) {
                let message = "non-uniform value reaches a uniformity requirement".to_string();
                if severity == Severity::Error {
                    return Err(Error::UniformityViolation {
                        severity,
                        function: self.function.name.clone(),
                        message,
                    });
                }
                diagnostics.push(UniformityDiagnostic {
                    severity,
                    function: self.function.name.clone(),
                    message,
                });
                continue;
            }
            if reached.contains(&self.cf_start) && tags.call_site == CallSiteTag::NoRestriction {
                tags.call_site = CallSiteTag::RequiredToBeUniform(severity);
            }
            for (index, param) in self.param_nodes.iter().enumerate() {
                if reached.contains(param) && tags.parameters[index] == ParameterTag::NoRestriction
                {
                    tags.parameters[index] = ParameterTag::ParameterRequiredToBeUniform(severity);
                }
            }
        }

        if let Some(value_return) = self.value_return {
            let mut visited = vec![false; self.nodes.len()];
            let reached = self.sweep(value_return, &mut visited);
            if reached.contains(&self.may_be_non_uniform) {
                tags.function_tag = FunctionTag::ReturnValueMayBeNonUniform;
            }
            // A returned value always exposes parameter contents.
            for tag in &mut tags.parameter_returns {
                *tag = ParameterReturnTag::ParameterContentsRequiredToBeUniform;
            }
        }

        Ok(tags)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // DOT output
    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn write_dot(&self, out: &mut String) {
        let function = &self.function.name;
        let _ = writeln!(out, "  subgraph cluster_{} {{", function);
        let _ = writeln!(out, "    label=\"{}\";", function);
        for (index, node) in self.nodes.iter().enumerate() {
            let _ = writeln!(out, "    {}_{} [label=\"{}\"];", function, index, node.name);
        }
        for (index, node) in self.nodes.iter().enumerate() {
            for edge in &node.edges {
                let _ = writeln!(
                    out,
                    "    {}_{} -> {}_{} [label=\"{} -> {}\"];",
                    function,
                    index,
                    function,
                    edge.0,
                    node.name,
                    self.nodes[edge.0 as usize].name
                );
            }
        }
        let _ = writeln!(out, "  }}");
    }
}
