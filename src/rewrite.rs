//! Clone-with-replacement tree rebuilding.
//!
//! The reducer forms candidate trees by replacing, removing or splicing
//! nodes picked by pointer identity. Unchanged subtrees are shared with
//! the input tree (same `Rc`), so surviving nodes keep their identity
//! across candidates.

use std::rc::Rc;

use crate::ast::{
    AugmentedExpression, CaseSelectors, Compound, ContinuingBlock, Expression, FunctionDecl,
    GlobalDecl, LhsExpression, Statement, SwitchClause, TranslationUnit,
};

/// What to do with a matched statement.
pub enum StatementAction {
    Replace(Rc<Statement>),
    Remove,
    Splice(Vec<Rc<Statement>>),
}

type ExpressionFn<'a> = &'a mut dyn FnMut(&Rc<Expression>) -> Option<Rc<Expression>>;
type StatementFn<'a> = &'a mut dyn FnMut(&Rc<Statement>) -> Option<StatementAction>;

#[derive(Default)]
pub struct Rewriter<'a> {
    pub expression: Option<ExpressionFn<'a>>,
    pub statement: Option<StatementFn<'a>>,
    /// Splice the contents of nested compounds whose metadata is empty
    /// into the surrounding statement list (used after unwrapping
    /// control-flow wrappers).
    pub flatten_unmarked_compounds: bool,
}

impl<'a> Rewriter<'a> {
    pub fn rewrite_unit(&mut self, tu: &TranslationUnit) -> TranslationUnit {
        let declarations = tu
            .declarations
            .iter()
            .map(|decl| self.global_decl(decl))
            .collect();
        TranslationUnit {
            directives: tu.directives.clone(),
            declarations,
        }
    }

    fn global_decl(&mut self, decl: &Rc<GlobalDecl>) -> Rc<GlobalDecl> {
        match &**decl {
            GlobalDecl::Constant {
                name,
                ty,
                initializer,
            } => {
                let new_init = self.expression(initializer);
                if Rc::ptr_eq(&new_init, initializer) {
                    decl.clone()
                } else {
                    Rc::new(GlobalDecl::Constant {
                        name: name.clone(),
                        ty: ty.clone(),
                        initializer: new_init,
                    })
                }
            }
            GlobalDecl::Override {
                attributes,
                name,
                ty,
                initializer,
            } => {
                let new_init = initializer.as_ref().map(|e| self.expression(e));
                match (&new_init, initializer) {
                    (Some(n), Some(old)) if !Rc::ptr_eq(n, old) => Rc::new(GlobalDecl::Override {
                        attributes: attributes.clone(),
                        name: name.clone(),
                        ty: ty.clone(),
                        initializer: new_init,
                    }),
                    _ => decl.clone(),
                }
            }
            GlobalDecl::Variable {
                attributes,
                name,
                address_space,
                access_mode,
                ty,
                initializer,
            } => {
                let new_init = initializer.as_ref().map(|e| self.expression(e));
                match (&new_init, initializer) {
                    (Some(n), Some(old)) if !Rc::ptr_eq(n, old) => Rc::new(GlobalDecl::Variable {
                        attributes: attributes.clone(),
                        name: name.clone(),
                        address_space: *address_space,
                        access_mode: *access_mode,
                        ty: ty.clone(),
                        initializer: new_init,
                    }),
                    _ => decl.clone(),
                }
            }
            GlobalDecl::Function(function) => {
                let new_body = self.statement_single(&function.body);
                if Rc::ptr_eq(&new_body, &function.body) {
                    decl.clone()
                } else {
                    Rc::new(GlobalDecl::Function(Rc::new(FunctionDecl {
                        attributes: function.attributes.clone(),
                        name: function.name.clone(),
                        parameters: function.parameters.clone(),
                        return_attributes: function.return_attributes.clone(),
                        return_type: function.return_type.clone(),
                        body: new_body,
                    })))
                }
            }
            GlobalDecl::ConstAssert { expression } => {
                let new_expr = self.expression(expression);
                if Rc::ptr_eq(&new_expr, expression) {
                    decl.clone()
                } else {
                    Rc::new(GlobalDecl::ConstAssert {
                        expression: new_expr,
                    })
                }
            }
            GlobalDecl::Struct { .. } | GlobalDecl::TypeAlias { .. } | GlobalDecl::Empty => {
                decl.clone()
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Statements
    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn statement_list(&mut self, statements: &[Rc<Statement>]) -> (Vec<Rc<Statement>>, bool) {
        let mut out = Vec::with_capacity(statements.len());
        let mut changed = false;
        for statement in statements {
            match self.apply_statement(statement) {
                None => {
                    let rebuilt = self.rebuild_statement(statement);
                    if !Rc::ptr_eq(&rebuilt, statement) {
                        changed = true;
                    }
                    self.push_flattened(&mut out, rebuilt, &mut changed);
                }
                Some(StatementAction::Replace(replacement)) => {
                    changed = true;
                    let rebuilt = self.statement_single(&replacement);
                    self.push_flattened(&mut out, rebuilt, &mut changed);
                }
                Some(StatementAction::Remove) => {
                    changed = true;
                }
                Some(StatementAction::Splice(replacements)) => {
                    changed = true;
                    for replacement in replacements {
                        let rebuilt = self.statement_single(&replacement);
                        self.push_flattened(&mut out, rebuilt, &mut changed);
                    }
                }
            }
        }
        (out, changed)
    }

    fn push_flattened(
        &mut self,
        out: &mut Vec<Rc<Statement>>,
        statement: Rc<Statement>,
        changed: &mut bool,
    ) {
        if self.flatten_unmarked_compounds {
            if let Statement::Compound(compound) = &*statement {
                if compound.metadata.is_empty() {
                    *changed = true;
                    out.extend(compound.statements.iter().cloned());
                    return;
                }
            }
        }
        out.push(statement);
    }

    /// Rewrites a statement in a position that must stay a single
    /// statement: removals become `Empty`, splices become a compound.
    pub fn statement_single(&mut self, statement: &Rc<Statement>) -> Rc<Statement> {
        match self.apply_statement(statement) {
            None => self.rebuild_statement(statement),
            Some(StatementAction::Replace(replacement)) => {
                if Rc::ptr_eq(&replacement, statement) {
                    self.rebuild_statement(statement)
                } else {
                    self.statement_single(&replacement)
                }
            }
            Some(StatementAction::Remove) => Rc::new(Statement::Empty),
            Some(StatementAction::Splice(statements)) => {
                Rc::new(Statement::Compound(Compound::new(statements)))
            }
        }
    }

    fn apply_statement(&mut self, statement: &Rc<Statement>) -> Option<StatementAction> {
        self.statement.as_mut().and_then(|f| f(statement))
    }

    fn rebuild_statement(&mut self, statement: &Rc<Statement>) -> Rc<Statement> {
        match &**statement {
            Statement::Compound(compound) => {
                let (statements, changed) = self.statement_list(&compound.statements);
                if changed {
                    Rc::new(Statement::Compound(Compound {
                        statements,
                        metadata: compound.metadata.clone(),
                    }))
                } else {
                    statement.clone()
                }
            }
            Statement::Empty
            | Statement::Break
            | Statement::Continue
            | Statement::Discard => statement.clone(),
            Statement::Return { expression } => {
                rebuild_optional_expression(self, statement, expression, |expression| {
                    Statement::Return { expression }
                })
            }
            Statement::ValueDecl {
                kind,
                name,
                ty,
                initializer,
            } => {
                let new_init = self.expression(initializer);
                if Rc::ptr_eq(&new_init, initializer) {
                    statement.clone()
                } else {
                    Rc::new(Statement::ValueDecl {
                        kind: *kind,
                        name: name.clone(),
                        ty: ty.clone(),
                        initializer: new_init,
                    })
                }
            }
            Statement::Variable {
                name,
                ty,
                initializer,
            } => rebuild_optional_expression(self, statement, initializer, |initializer| {
                Statement::Variable {
                    name: name.clone(),
                    ty: ty.clone(),
                    initializer,
                }
            }),
            Statement::Assignment {
                lhs,
                operator,
                rhs,
            } => {
                let new_lhs = lhs.as_ref().map(|l| self.lhs(l));
                let new_rhs = self.expression(rhs);
                let lhs_changed = match (&new_lhs, lhs) {
                    (Some(n), Some(old)) => !Rc::ptr_eq(n, old),
                    _ => false,
                };
                if !lhs_changed && Rc::ptr_eq(&new_rhs, rhs) {
                    statement.clone()
                } else {
                    Rc::new(Statement::Assignment {
                        lhs: new_lhs,
                        operator: *operator,
                        rhs: new_rhs,
                    })
                }
            }
            Statement::Increment { target } => {
                let new_target = self.lhs(target);
                if Rc::ptr_eq(&new_target, target) {
                    statement.clone()
                } else {
                    Rc::new(Statement::Increment { target: new_target })
                }
            }
            Statement::Decrement { target } => {
                let new_target = self.lhs(target);
                if Rc::ptr_eq(&new_target, target) {
                    statement.clone()
                } else {
                    Rc::new(Statement::Decrement { target: new_target })
                }
            }
            Statement::FunctionCall {
                callee,
                template,
                arguments,
            } => {
                let (new_args, changed) = self.expression_list(arguments);
                if changed {
                    Rc::new(Statement::FunctionCall {
                        callee: callee.clone(),
                        template: template.clone(),
                        arguments: new_args,
                    })
                } else {
                    statement.clone()
                }
            }
            Statement::For {
                initializer,
                condition,
                update,
                body,
            } => {
                let new_init = initializer.as_ref().map(|s| self.statement_single(s));
                let new_condition = condition.as_ref().map(|e| self.expression(e));
                let new_update = update.as_ref().map(|s| self.statement_single(s));
                let new_body = self.statement_single(body);
                let changed = option_changed(&new_init, initializer)
                    || option_changed(&new_condition, condition)
                    || option_changed(&new_update, update)
                    || !Rc::ptr_eq(&new_body, body);
                if changed {
                    Rc::new(Statement::For {
                        initializer: new_init,
                        condition: new_condition,
                        update: new_update,
                        body: new_body,
                    })
                } else {
                    statement.clone()
                }
            }
            Statement::While { condition, body } => {
                let new_condition = self.expression(condition);
                let new_body = self.statement_single(body);
                if Rc::ptr_eq(&new_condition, condition) && Rc::ptr_eq(&new_body, body) {
                    statement.clone()
                } else {
                    Rc::new(Statement::While {
                        condition: new_condition,
                        body: new_body,
                    })
                }
            }
            Statement::Loop { body, continuing } => {
                let (new_body, mut changed) = self.statement_list(body);
                let new_continuing = continuing.as_ref().map(|c| {
                    let (statements, c_changed) = self.statement_list(&c.statements);
                    let break_if = c.break_if.as_ref().map(|e| self.expression(e));
                    if c_changed || option_changed(&break_if, &c.break_if) {
                        changed = true;
                    }
                    ContinuingBlock {
                        statements,
                        break_if,
                    }
                });
                if changed {
                    Rc::new(Statement::Loop {
                        body: new_body,
                        continuing: new_continuing,
                    })
                } else {
                    statement.clone()
                }
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let new_condition = self.expression(condition);
                let new_then = self.statement_single(then_branch);
                let new_else = else_branch.as_ref().map(|s| self.statement_single(s));
                let changed = !Rc::ptr_eq(&new_condition, condition)
                    || !Rc::ptr_eq(&new_then, then_branch)
                    || option_changed(&new_else, else_branch);
                if changed {
                    Rc::new(Statement::If {
                        condition: new_condition,
                        then_branch: new_then,
                        else_branch: new_else,
                    })
                } else {
                    statement.clone()
                }
            }
            Statement::Switch { selector, clauses } => {
                let new_selector = self.expression(selector);
                let mut changed = !Rc::ptr_eq(&new_selector, selector);
                let new_clauses: Vec<SwitchClause> = clauses
                    .iter()
                    .map(|clause| {
                        let selectors = match &clause.selectors {
                            CaseSelectors::DefaultAlone => CaseSelectors::DefaultAlone,
                            CaseSelectors::Expressions(exprs) => CaseSelectors::Expressions(
                                exprs
                                    .iter()
                                    .map(|e| {
                                        e.as_ref().map(|e| {
                                            let new_e = self.expression(e);
                                            if !Rc::ptr_eq(&new_e, e) {
                                                changed = true;
                                            }
                                            new_e
                                        })
                                    })
                                    .collect(),
                            ),
                        };
                        let body = self.statement_single(&clause.body);
                        if !Rc::ptr_eq(&body, &clause.body) {
                            changed = true;
                        }
                        SwitchClause { selectors, body }
                    })
                    .collect();
                if changed {
                    Rc::new(Statement::Switch {
                        selector: new_selector,
                        clauses: new_clauses,
                    })
                } else {
                    statement.clone()
                }
            }
            Statement::ConstAssert { expression } => {
                let new_expr = self.expression(expression);
                if Rc::ptr_eq(&new_expr, expression) {
                    statement.clone()
                } else {
                    Rc::new(Statement::ConstAssert {
                        expression: new_expr,
                    })
                }
            }
            Statement::DeadCodeFragment { body } => {
                let new_body = self.statement_single(body);
                if Rc::ptr_eq(&new_body, body) {
                    statement.clone()
                } else {
                    Rc::new(Statement::DeadCodeFragment { body: new_body })
                }
            }
            Statement::ControlFlowWrapper { id, body } => {
                let new_body = self.statement_single(body);
                if Rc::ptr_eq(&new_body, body) {
                    statement.clone()
                } else {
                    Rc::new(Statement::ControlFlowWrapper {
                        id: *id,
                        body: new_body,
                    })
                }
            }
            Statement::ControlFlowWrapReturn { id, body } => {
                let new_body = self.statement_single(body);
                if Rc::ptr_eq(&new_body, body) {
                    statement.clone()
                } else {
                    Rc::new(Statement::ControlFlowWrapReturn {
                        id: *id,
                        body: new_body,
                    })
                }
            }
            Statement::ControlFlowWrapHelperStatement { id, body } => {
                let new_body = self.statement_single(body);
                if Rc::ptr_eq(&new_body, body) {
                    statement.clone()
                } else {
                    Rc::new(Statement::ControlFlowWrapHelperStatement {
                        id: *id,
                        body: new_body,
                    })
                }
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Expressions
    ////////////////////////////////////////////////////////////////////////////////////////////////

    pub fn expression(&mut self, expression: &Rc<Expression>) -> Rc<Expression> {
        if let Some(f) = self.expression.as_mut() {
            if let Some(replacement) = f(expression) {
                if Rc::ptr_eq(&replacement, expression) {
                    return self.rebuild_expression(expression);
                }
                // The replacement may itself contain further matches
                // (e.g. nested markers restored in the same window).
                return self.expression(&replacement);
            }
        }
        self.rebuild_expression(expression)
    }

    fn expression_list(&mut self, expressions: &[Rc<Expression>]) -> (Vec<Rc<Expression>>, bool) {
        let mut changed = false;
        let out = expressions
            .iter()
            .map(|e| {
                let new_e = self.expression(e);
                if !Rc::ptr_eq(&new_e, e) {
                    changed = true;
                }
                new_e
            })
            .collect();
        (out, changed)
    }

    fn rebuild_expression(&mut self, expression: &Rc<Expression>) -> Rc<Expression> {
        macro_rules! one {
            ($inner:expr, $build:expr) => {{
                let new_inner = self.expression($inner);
                if Rc::ptr_eq(&new_inner, $inner) {
                    expression.clone()
                } else {
                    Rc::new($build(new_inner))
                }
            }};
        }
        match &**expression {
            Expression::BoolLiteral(_)
            | Expression::IntLiteral(_)
            | Expression::FloatLiteral(_)
            | Expression::Identifier(_) => expression.clone(),
            Expression::Paren(inner) => one!(inner, Expression::Paren),
            Expression::Unary { operator, operand } => {
                let operator = *operator;
                one!(operand, |operand| Expression::Unary { operator, operand })
            }
            Expression::Binary { operator, lhs, rhs } => {
                let new_lhs = self.expression(lhs);
                let new_rhs = self.expression(rhs);
                if Rc::ptr_eq(&new_lhs, lhs) && Rc::ptr_eq(&new_rhs, rhs) {
                    expression.clone()
                } else {
                    Rc::new(Expression::Binary {
                        operator: *operator,
                        lhs: new_lhs,
                        rhs: new_rhs,
                    })
                }
            }
            Expression::FunctionCall {
                callee,
                template,
                arguments,
            } => {
                let (new_args, changed) = self.expression_list(arguments);
                if changed {
                    Rc::new(Expression::FunctionCall {
                        callee: callee.clone(),
                        template: template.clone(),
                        arguments: new_args,
                    })
                } else {
                    expression.clone()
                }
            }
            Expression::TypeConstructor { ty, arguments } => {
                let (new_args, changed) = self.expression_list(arguments);
                if changed {
                    Rc::new(Expression::TypeConstructor {
                        ty: ty.clone(),
                        arguments: new_args,
                    })
                } else {
                    expression.clone()
                }
            }
            Expression::Member { base, member } => {
                let member = member.clone();
                one!(base, |base| Expression::Member { base, member })
            }
            Expression::Index { base, index } => {
                let new_base = self.expression(base);
                let new_index = self.expression(index);
                if Rc::ptr_eq(&new_base, base) && Rc::ptr_eq(&new_index, index) {
                    expression.clone()
                } else {
                    Rc::new(Expression::Index {
                        base: new_base,
                        index: new_index,
                    })
                }
            }
            Expression::Augmented(augmented) => {
                let (new_augmented, changed) = self.rebuild_augmented(augmented);
                if changed {
                    Rc::new(Expression::Augmented(new_augmented))
                } else {
                    expression.clone()
                }
            }
        }
    }

    fn rebuild_augmented(&mut self, augmented: &AugmentedExpression) -> (AugmentedExpression, bool) {
        macro_rules! two {
            ($a:expr, $b:expr, $build:expr) => {{
                let new_a = self.expression($a);
                let new_b = self.expression($b);
                let changed = !Rc::ptr_eq(&new_a, $a) || !Rc::ptr_eq(&new_b, $b);
                ($build(new_a, new_b), changed)
            }};
        }
        match augmented {
            AugmentedExpression::AddZero {
                original,
                zero,
                zero_first,
            } => {
                let zero_first = *zero_first;
                two!(original, zero, |original, zero| {
                    AugmentedExpression::AddZero {
                        original,
                        zero,
                        zero_first,
                    }
                })
            }
            AugmentedExpression::SubZero { original, zero } => {
                two!(original, zero, |original, zero| {
                    AugmentedExpression::SubZero { original, zero }
                })
            }
            AugmentedExpression::MulOne {
                original,
                one,
                one_first,
            } => {
                let one_first = *one_first;
                two!(original, one, |original, one| AugmentedExpression::MulOne {
                    original,
                    one,
                    one_first,
                })
            }
            AugmentedExpression::DivOne { original, one } => {
                two!(original, one, |original, one| AugmentedExpression::DivOne {
                    original,
                    one,
                })
            }
            AugmentedExpression::KnownValue { expression, value } => {
                two!(expression, value, |expression, value| {
                    AugmentedExpression::KnownValue { expression, value }
                })
            }
            AugmentedExpression::IdentityOperation {
                original,
                replacement,
            } => {
                // `original` is shared inside `replacement`; rebuilding it
                // independently would break the sharing, so leave it be.
                let new_replacement = self.expression(replacement);
                let changed = !Rc::ptr_eq(&new_replacement, replacement);
                (
                    AugmentedExpression::IdentityOperation {
                        original: original.clone(),
                        replacement: new_replacement,
                    },
                    changed,
                )
            }
            AugmentedExpression::FalseByConstruction(inner) => {
                let new_inner = self.expression(inner);
                let changed = !Rc::ptr_eq(&new_inner, inner);
                (AugmentedExpression::FalseByConstruction(new_inner), changed)
            }
            AugmentedExpression::TrueByConstruction(inner) => {
                let new_inner = self.expression(inner);
                let changed = !Rc::ptr_eq(&new_inner, inner);
                (AugmentedExpression::TrueByConstruction(new_inner), changed)
            }
            AugmentedExpression::ArbitraryExpression(inner) => {
                let new_inner = self.expression(inner);
                let changed = !Rc::ptr_eq(&new_inner, inner);
                (AugmentedExpression::ArbitraryExpression(new_inner), changed)
            }
        }
    }

    fn lhs(&mut self, lhs: &Rc<LhsExpression>) -> Rc<LhsExpression> {
        match &**lhs {
            LhsExpression::Identifier(_) => lhs.clone(),
            LhsExpression::Paren(inner) => {
                let new_inner = self.lhs(inner);
                if Rc::ptr_eq(&new_inner, inner) {
                    lhs.clone()
                } else {
                    Rc::new(LhsExpression::Paren(new_inner))
                }
            }
            LhsExpression::Member { base, member } => {
                let new_base = self.lhs(base);
                if Rc::ptr_eq(&new_base, base) {
                    lhs.clone()
                } else {
                    Rc::new(LhsExpression::Member {
                        base: new_base,
                        member: member.clone(),
                    })
                }
            }
            LhsExpression::Index { base, index } => {
                let new_base = self.lhs(base);
                let new_index = self.expression(index);
                if Rc::ptr_eq(&new_base, base) && Rc::ptr_eq(&new_index, index) {
                    lhs.clone()
                } else {
                    Rc::new(LhsExpression::Index {
                        base: new_base,
                        index: new_index,
                    })
                }
            }
            LhsExpression::Deref(inner) => {
                let new_inner = self.lhs(inner);
                if Rc::ptr_eq(&new_inner, inner) {
                    lhs.clone()
                } else {
                    Rc::new(LhsExpression::Deref(new_inner))
                }
            }
            LhsExpression::AddressOf(inner) => {
                let new_inner = self.lhs(inner);
                if Rc::ptr_eq(&new_inner, inner) {
                    lhs.clone()
                } else {
                    Rc::new(LhsExpression::AddressOf(new_inner))
                }
            }
        }
    }
}

fn option_changed<T>(new: &Option<Rc<T>>, old: &Option<Rc<T>>) -> bool {
    match (new, old) {
        (Some(n), Some(o)) => !Rc::ptr_eq(n, o),
        (None, None) => false,
        _ => true,
    }
}

fn rebuild_optional_expression(
    rw: &mut Rewriter,
    statement: &Rc<Statement>,
    expression: &Option<Rc<Expression>>,
    build: impl FnOnce(Option<Rc<Expression>>) -> Statement,
) -> Rc<Statement> {
    let new_expr = expression.as_ref().map(|e| rw.expression(e));
    if option_changed(&new_expr, expression) {
        Rc::new(build(new_expr))
    } else {
        statement.clone()
    }
}
