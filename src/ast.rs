//! WGSL abstract syntax tree.
//!
//! Nodes are immutable after construction and shared through [`Rc`]; node
//! identity is allocation identity, which is what the resolver's
//! environment maps and the reducer's opportunity bookkeeping key on.
//! Transformed trees share unchanged subtrees with their originals.

use smallvec::SmallVec;
use smol_str::SmolStr;
use std::rc::Rc;
use strum::Display;

use crate::types::{AccessMode, AddressSpace};

/// A parsed WGSL module: directives (kept as opaque source text) followed
/// by the ordered global declarations.
#[derive(Clone, Debug, PartialEq)]
pub struct TranslationUnit {
    pub directives: Vec<SmolStr>,
    pub declarations: Vec<Rc<GlobalDecl>>,
}

/// `@name` or `@name(arg, ...)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub name: SmolStr,
    pub args: Vec<Rc<Expression>>,
}

/// A syntactic type reference, e.g. `i32`, `vec3<f32>`, `array<S, 4>`.
/// Resolution to a canonical [`crate::types::Type`] happens in the
/// resolver; the parser only records the spelled name and template.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeDecl {
    pub name: SmolStr,
    pub template: Vec<TemplateArg>,
}

impl TypeDecl {
    pub fn plain(name: impl Into<SmolStr>) -> TypeDecl {
        TypeDecl {
            name: name.into(),
            template: Vec::new(),
        }
    }
}

/// Template arguments are either types or expressions. An argument that
/// starts with an identifier always parses as a type; the resolver
/// reinterprets it as a constant where a count is expected.
#[derive(Clone, Debug, PartialEq)]
pub enum TemplateArg {
    Type(Rc<TypeDecl>),
    Expression(Rc<Expression>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructMemberDecl {
    pub attributes: Vec<Attribute>,
    pub name: SmolStr,
    pub ty: Rc<TypeDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormalParameter {
    pub attributes: Vec<Attribute>,
    pub name: SmolStr,
    pub ty: Rc<TypeDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDecl {
    pub attributes: Vec<Attribute>,
    pub name: SmolStr,
    pub parameters: Vec<FormalParameter>,
    pub return_attributes: Vec<Attribute>,
    pub return_type: Option<Rc<TypeDecl>>,
    /// Always a [`Statement::Compound`].
    pub body: Rc<Statement>,
}

/// Module-scope declarations.
#[derive(Clone, Debug, PartialEq)]
pub enum GlobalDecl {
    Constant {
        name: SmolStr,
        ty: Option<Rc<TypeDecl>>,
        initializer: Rc<Expression>,
    },
    Override {
        attributes: Vec<Attribute>,
        name: SmolStr,
        ty: Option<Rc<TypeDecl>>,
        initializer: Option<Rc<Expression>>,
    },
    Variable {
        attributes: Vec<Attribute>,
        name: SmolStr,
        address_space: Option<AddressSpace>,
        access_mode: Option<AccessMode>,
        ty: Option<Rc<TypeDecl>>,
        initializer: Option<Rc<Expression>>,
    },
    Function(Rc<FunctionDecl>),
    Struct {
        name: SmolStr,
        members: Vec<StructMemberDecl>,
    },
    TypeAlias {
        name: SmolStr,
        ty: Rc<TypeDecl>,
    },
    ConstAssert {
        expression: Rc<Expression>,
    },
    Empty,
}

impl GlobalDecl {
    /// The introduced module-scope name, if this variant introduces one.
    pub fn name(&self) -> Option<&SmolStr> {
        match self {
            GlobalDecl::Constant { name, .. }
            | GlobalDecl::Override { name, .. }
            | GlobalDecl::Variable { name, .. }
            | GlobalDecl::Struct { name, .. }
            | GlobalDecl::TypeAlias { name, .. } => Some(name),
            GlobalDecl::Function(f) => Some(&f.name),
            GlobalDecl::ConstAssert { .. } | GlobalDecl::Empty => None,
        }
    }
}

/// A brace-delimited statement list. `metadata` carries control-flow
/// wrapper ids so unwrapping can find the originally wrapped statements;
/// it never prints.
#[derive(Clone, Debug, PartialEq)]
pub struct Compound {
    pub statements: Vec<Rc<Statement>>,
    pub metadata: SmallVec<[u32; 1]>,
}

impl Compound {
    pub fn new(statements: Vec<Rc<Statement>>) -> Compound {
        Compound {
            statements,
            metadata: SmallVec::new(),
        }
    }

    pub fn tagged(statements: Vec<Rc<Statement>>, id: u32) -> Compound {
        let mut metadata = SmallVec::new();
        metadata.push(id);
        Compound { statements, metadata }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValueDeclKind {
    Let,
    Const,
}

/// The `continuing { ... }` block of a loop. Its statements share the loop
/// body's scope, which is why the loop body is a plain statement list
/// rather than a compound.
#[derive(Clone, Debug, PartialEq)]
pub struct ContinuingBlock {
    pub statements: Vec<Rc<Statement>>,
    pub break_if: Option<Rc<Expression>>,
}

/// One `case`/`default` clause. `None` in the expression list stands for
/// `default` appearing among case selectors.
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchClause {
    pub selectors: CaseSelectors,
    /// Always a [`Statement::Compound`].
    pub body: Rc<Statement>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CaseSelectors {
    DefaultAlone,
    Expressions(Vec<Option<Rc<Expression>>>),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Display)]
pub enum AssignmentOperator {
    #[strum(serialize = "=")]
    Assign,
    #[strum(serialize = "+=")]
    AddAssign,
    #[strum(serialize = "-=")]
    SubAssign,
    #[strum(serialize = "*=")]
    MulAssign,
    #[strum(serialize = "/=")]
    DivAssign,
    #[strum(serialize = "%=")]
    ModAssign,
    #[strum(serialize = "&=")]
    AndAssign,
    #[strum(serialize = "|=")]
    OrAssign,
    #[strum(serialize = "^=")]
    XorAssign,
    #[strum(serialize = "<<=")]
    ShlAssign,
    #[strum(serialize = ">>=")]
    ShrAssign,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Compound(Compound),
    Empty,
    Break,
    Continue,
    Discard,
    Return {
        expression: Option<Rc<Expression>>,
    },
    ValueDecl {
        kind: ValueDeclKind,
        name: SmolStr,
        ty: Option<Rc<TypeDecl>>,
        initializer: Rc<Expression>,
    },
    Variable {
        name: SmolStr,
        ty: Option<Rc<TypeDecl>>,
        initializer: Option<Rc<Expression>>,
    },
    /// `lhs op rhs;`, or the phantom form `_ = rhs;` when `lhs` is absent.
    Assignment {
        lhs: Option<Rc<LhsExpression>>,
        operator: AssignmentOperator,
        rhs: Rc<Expression>,
    },
    Increment {
        target: Rc<LhsExpression>,
    },
    Decrement {
        target: Rc<LhsExpression>,
    },
    FunctionCall {
        callee: SmolStr,
        template: Option<Rc<TypeDecl>>,
        arguments: Vec<Rc<Expression>>,
    },
    For {
        initializer: Option<Rc<Statement>>,
        condition: Option<Rc<Expression>>,
        update: Option<Rc<Statement>>,
        /// Always a [`Statement::Compound`]; shares scope with the header.
        body: Rc<Statement>,
    },
    While {
        condition: Rc<Expression>,
        body: Rc<Statement>,
    },
    Loop {
        body: Vec<Rc<Statement>>,
        continuing: Option<ContinuingBlock>,
    },
    If {
        condition: Rc<Expression>,
        then_branch: Rc<Statement>,
        /// Either another `If` or a `Compound`.
        else_branch: Option<Rc<Statement>>,
    },
    Switch {
        selector: Rc<Expression>,
        clauses: Vec<SwitchClause>,
    },
    ConstAssert {
        expression: Rc<Expression>,
    },

    // Metamorphic markers. Each prints as the real construct it carries and
    // is reversible by the reducer.
    /// A statement whose dynamic effect is provably absent, typically
    /// `if (<false-by-construction>) { ... }`.
    DeadCodeFragment {
        body: Rc<Statement>,
    },
    /// Wraps originally-present statements in control flow that always
    /// executes them exactly once. The originals live in compounds tagged
    /// with `id`.
    ControlFlowWrapper {
        id: u32,
        body: Rc<Statement>,
    },
    /// A synthesized `return` required to keep a wrapped function
    /// well-formed; deleted when wrapper `id` is unwrapped.
    ControlFlowWrapReturn {
        id: u32,
        body: Rc<Statement>,
    },
    /// A synthesized helper (e.g. the `break` of a single-trip loop
    /// wrapper); deleted when wrapper `id` is unwrapped.
    ControlFlowWrapHelperStatement {
        id: u32,
        body: Rc<Statement>,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Display)]
pub enum UnaryOperator {
    #[strum(serialize = "-")]
    Negate,
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "~")]
    Complement,
    #[strum(serialize = "*")]
    Deref,
    #[strum(serialize = "&")]
    AddressOf,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Display)]
pub enum BinaryOperator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "&&")]
    ShortCircuitAnd,
    #[strum(serialize = "||")]
    ShortCircuitOr,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "<<")]
    ShiftLeft,
    #[strum(serialize = ">>")]
    ShiftRight,
    #[strum(serialize = "==")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "<")]
    LessThan,
    #[strum(serialize = ">")]
    GreaterThan,
    #[strum(serialize = "<=")]
    LessEqual,
    #[strum(serialize = ">=")]
    GreaterEqual,
}

impl BinaryOperator {
    pub fn is_short_circuit(&self) -> bool {
        matches!(
            self,
            BinaryOperator::ShortCircuitAnd | BinaryOperator::ShortCircuitOr
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    BoolLiteral(bool),
    /// Source text, including the optional `i`/`u` suffix.
    IntLiteral(SmolStr),
    /// Source text, including the optional `f`/`h` suffix.
    FloatLiteral(SmolStr),
    Identifier(SmolStr),
    Paren(Rc<Expression>),
    Unary {
        operator: UnaryOperator,
        operand: Rc<Expression>,
    },
    Binary {
        operator: BinaryOperator,
        lhs: Rc<Expression>,
        rhs: Rc<Expression>,
    },
    /// `callee(args)` or `callee<T>(args)` where `callee` is not a
    /// predeclared type head; the resolver decides between a user function
    /// and a struct/alias value constructor.
    FunctionCall {
        callee: SmolStr,
        template: Option<Rc<TypeDecl>>,
        arguments: Vec<Rc<Expression>>,
    },
    /// Value constructor with a syntactically known type head:
    /// `vec3<f32>(...)`, `vec3f(...)`, `i32(...)`, `array<f32, 2>(...)`.
    TypeConstructor {
        ty: Rc<TypeDecl>,
        arguments: Vec<Rc<Expression>>,
    },
    Member {
        base: Rc<Expression>,
        member: SmolStr,
    },
    Index {
        base: Rc<Expression>,
        index: Rc<Expression>,
    },
    Augmented(AugmentedExpression),
}

impl Expression {
    /// The concrete-type suffix of an int/float literal (`i`, `u`, `f`,
    /// `h`), or `None` for an abstract literal or a non-literal.
    pub fn literal_suffix(&self) -> Option<char> {
        let (text, hex) = match self {
            Expression::IntLiteral(t) => (t, t.starts_with("0x") || t.starts_with("0X")),
            Expression::FloatLiteral(t) => (t, false),
            _ => return None,
        };
        match text.as_str().chars().last() {
            // `f` and `h` are digits in a hex int literal, not suffixes.
            Some(c @ ('f' | 'h')) if !hex => Some(c),
            Some(c @ ('i' | 'u')) => Some(c),
            _ => None,
        }
    }
}

/// Metamorphic expression markers. Each remembers the expression it can be
/// reduced back to (or the known constant it can be replaced by) while
/// printing as the full obfuscated form.
#[derive(Clone, Debug, PartialEq)]
pub enum AugmentedExpression {
    AddZero {
        original: Rc<Expression>,
        zero: Rc<Expression>,
        zero_first: bool,
    },
    SubZero {
        original: Rc<Expression>,
        zero: Rc<Expression>,
    },
    MulOne {
        original: Rc<Expression>,
        one: Rc<Expression>,
        one_first: bool,
    },
    DivOne {
        original: Rc<Expression>,
        one: Rc<Expression>,
    },
    /// `expression` computes the same value as the plain constant `value`
    /// under the shader job's known uniform values.
    KnownValue {
        expression: Rc<Expression>,
        value: Rc<Expression>,
    },
    /// `replacement` is semantically identical to `original` (e.g.
    /// `max(e, e)`).
    IdentityOperation {
        original: Rc<Expression>,
        replacement: Rc<Expression>,
    },
    /// Evaluates to `false` for every invocation.
    FalseByConstruction(Rc<Expression>),
    /// Evaluates to `true` for every invocation.
    TrueByConstruction(Rc<Expression>),
    /// A don't-care expression the reducer may shrink to any value of the
    /// same type.
    ArbitraryExpression(Rc<Expression>),
}

/// Assignment targets; mirrors the subset of expressions that denote
/// storage.
#[derive(Clone, Debug, PartialEq)]
pub enum LhsExpression {
    Identifier(SmolStr),
    Paren(Rc<LhsExpression>),
    Member {
        base: Rc<LhsExpression>,
        member: SmolStr,
    },
    Index {
        base: Rc<LhsExpression>,
        index: Rc<Expression>,
    },
    Deref(Rc<LhsExpression>),
    AddressOf(Rc<LhsExpression>),
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Traversal
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A borrowed reference to any AST node kind, for the generic traversal.
#[derive(Copy, Clone, Debug)]
pub enum NodeRef<'a> {
    TranslationUnit(&'a TranslationUnit),
    GlobalDecl(&'a GlobalDecl),
    Statement(&'a Statement),
    Expression(&'a Expression),
    LhsExpression(&'a LhsExpression),
    TypeDecl(&'a TypeDecl),
    Attribute(&'a Attribute),
}

/// Invokes `action` on every direct structural child of `node`, in source
/// order, skipping scalar attributes (names, operators, flags). Does not
/// recurse; callers recurse from within `action`.
///
/// Every node variant is matched here; a variant added without updating
/// this dispatch is a compile error.
pub fn visit_children<S>(
    action: &mut dyn FnMut(NodeRef<'_>, &mut S),
    node: NodeRef<'_>,
    state: &mut S,
) {
    match node {
        NodeRef::TranslationUnit(tu) => {
            for decl in &tu.declarations {
                action(NodeRef::GlobalDecl(decl), state);
            }
        }
        NodeRef::GlobalDecl(decl) => match decl {
            GlobalDecl::Constant { ty, initializer, .. } => {
                if let Some(ty) = ty {
                    action(NodeRef::TypeDecl(ty), state);
                }
                action(NodeRef::Expression(initializer), state);
            }
            GlobalDecl::Override {
                attributes,
                ty,
                initializer,
                ..
            } => {
                for attr in attributes {
                    action(NodeRef::Attribute(attr), state);
                }
                if let Some(ty) = ty {
                    action(NodeRef::TypeDecl(ty), state);
                }
                if let Some(init) = initializer {
                    action(NodeRef::Expression(init), state);
                }
            }
            GlobalDecl::Variable {
                attributes,
                ty,
                initializer,
                ..
            } => {
                for attr in attributes {
                    action(NodeRef::Attribute(attr), state);
                }
                if let Some(ty) = ty {
                    action(NodeRef::TypeDecl(ty), state);
                }
                if let Some(init) = initializer {
                    action(NodeRef::Expression(init), state);
                }
            }
            GlobalDecl::Function(f) => {
                for attr in &f.attributes {
                    action(NodeRef::Attribute(attr), state);
                }
                for param in &f.parameters {
                    for attr in &param.attributes {
                        action(NodeRef::Attribute(attr), state);
                    }
                    action(NodeRef::TypeDecl(&param.ty), state);
                }
                for attr in &f.return_attributes {
                    action(NodeRef::Attribute(attr), state);
                }
                if let Some(ret) = &f.return_type {
                    action(NodeRef::TypeDecl(ret), state);
                }
                action(NodeRef::Statement(&f.body), state);
            }
            GlobalDecl::Struct { members, .. } => {
                for member in members {
                    for attr in &member.attributes {
                        action(NodeRef::Attribute(attr), state);
                    }
                    action(NodeRef::TypeDecl(&member.ty), state);
                }
            }
            GlobalDecl::TypeAlias { ty, .. } => {
                action(NodeRef::TypeDecl(ty), state);
            }
            GlobalDecl::ConstAssert { expression } => {
                action(NodeRef::Expression(expression), state);
            }
            GlobalDecl::Empty => {}
        },
        NodeRef::Statement(stmt) => match stmt {
            Statement::Compound(compound) => {
                for s in &compound.statements {
                    action(NodeRef::Statement(s), state);
                }
            }
            Statement::Empty
            | Statement::Break
            | Statement::Continue
            | Statement::Discard => {}
            Statement::Return { expression } => {
                if let Some(e) = expression {
                    action(NodeRef::Expression(e), state);
                }
            }
            Statement::ValueDecl { ty, initializer, .. } => {
                if let Some(ty) = ty {
                    action(NodeRef::TypeDecl(ty), state);
                }
                action(NodeRef::Expression(initializer), state);
            }
            Statement::Variable { ty, initializer, .. } => {
                if let Some(ty) = ty {
                    action(NodeRef::TypeDecl(ty), state);
                }
                if let Some(init) = initializer {
                    action(NodeRef::Expression(init), state);
                }
            }
            Statement::Assignment { lhs, rhs, .. } => {
                if let Some(lhs) = lhs {
                    action(NodeRef::LhsExpression(lhs), state);
                }
                action(NodeRef::Expression(rhs), state);
            }
            Statement::Increment { target } | Statement::Decrement { target } => {
                action(NodeRef::LhsExpression(target), state);
            }
            Statement::FunctionCall {
                template, arguments, ..
            } => {
                if let Some(t) = template {
                    action(NodeRef::TypeDecl(t), state);
                }
                for arg in arguments {
                    action(NodeRef::Expression(arg), state);
                }
            }
            Statement::For {
                initializer,
                condition,
                update,
                body,
            } => {
                if let Some(init) = initializer {
                    action(NodeRef::Statement(init), state);
                }
                if let Some(cond) = condition {
                    action(NodeRef::Expression(cond), state);
                }
                if let Some(update) = update {
                    action(NodeRef::Statement(update), state);
                }
                action(NodeRef::Statement(body), state);
            }
            Statement::While { condition, body } => {
                action(NodeRef::Expression(condition), state);
                action(NodeRef::Statement(body), state);
            }
            Statement::Loop { body, continuing } => {
                for s in body {
                    action(NodeRef::Statement(s), state);
                }
                if let Some(continuing) = continuing {
                    for s in &continuing.statements {
                        action(NodeRef::Statement(s), state);
                    }
                    if let Some(break_if) = &continuing.break_if {
                        action(NodeRef::Expression(break_if), state);
                    }
                }
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                action(NodeRef::Expression(condition), state);
                action(NodeRef::Statement(then_branch), state);
                if let Some(else_branch) = else_branch {
                    action(NodeRef::Statement(else_branch), state);
                }
            }
            Statement::Switch { selector, clauses } => {
                action(NodeRef::Expression(selector), state);
                for clause in clauses {
                    if let CaseSelectors::Expressions(exprs) = &clause.selectors {
                        for e in exprs.iter().flatten() {
                            action(NodeRef::Expression(e), state);
                        }
                    }
                    action(NodeRef::Statement(&clause.body), state);
                }
            }
            Statement::ConstAssert { expression } => {
                action(NodeRef::Expression(expression), state);
            }
            Statement::DeadCodeFragment { body }
            | Statement::ControlFlowWrapper { body, .. }
            | Statement::ControlFlowWrapReturn { body, .. }
            | Statement::ControlFlowWrapHelperStatement { body, .. } => {
                action(NodeRef::Statement(body), state);
            }
        },
        NodeRef::Expression(expr) => match expr {
            Expression::BoolLiteral(_)
            | Expression::IntLiteral(_)
            | Expression::FloatLiteral(_)
            | Expression::Identifier(_) => {}
            Expression::Paren(inner) => {
                action(NodeRef::Expression(inner), state);
            }
            Expression::Unary { operand, .. } => {
                action(NodeRef::Expression(operand), state);
            }
            Expression::Binary { lhs, rhs, .. } => {
                action(NodeRef::Expression(lhs), state);
                action(NodeRef::Expression(rhs), state);
            }
            Expression::FunctionCall {
                template, arguments, ..
            } => {
                if let Some(t) = template {
                    action(NodeRef::TypeDecl(t), state);
                }
                for arg in arguments {
                    action(NodeRef::Expression(arg), state);
                }
            }
            Expression::TypeConstructor { ty, arguments } => {
                action(NodeRef::TypeDecl(ty), state);
                for arg in arguments {
                    action(NodeRef::Expression(arg), state);
                }
            }
            Expression::Member { base, .. } => {
                action(NodeRef::Expression(base), state);
            }
            Expression::Index { base, index } => {
                action(NodeRef::Expression(base), state);
                action(NodeRef::Expression(index), state);
            }
            Expression::Augmented(aug) => match aug {
                AugmentedExpression::AddZero {
                    original,
                    zero,
                    zero_first,
                } => {
                    if *zero_first {
                        action(NodeRef::Expression(zero), state);
                        action(NodeRef::Expression(original), state);
                    } else {
                        action(NodeRef::Expression(original), state);
                        action(NodeRef::Expression(zero), state);
                    }
                }
                AugmentedExpression::SubZero { original, zero } => {
                    action(NodeRef::Expression(original), state);
                    action(NodeRef::Expression(zero), state);
                }
                AugmentedExpression::MulOne {
                    original,
                    one,
                    one_first,
                } => {
                    if *one_first {
                        action(NodeRef::Expression(one), state);
                        action(NodeRef::Expression(original), state);
                    } else {
                        action(NodeRef::Expression(original), state);
                        action(NodeRef::Expression(one), state);
                    }
                }
                AugmentedExpression::DivOne { original, one } => {
                    action(NodeRef::Expression(original), state);
                    action(NodeRef::Expression(one), state);
                }
                AugmentedExpression::KnownValue { expression, value } => {
                    action(NodeRef::Expression(expression), state);
                    action(NodeRef::Expression(value), state);
                }
                AugmentedExpression::IdentityOperation { replacement, .. } => {
                    // `original` is a subtree of `replacement`; visiting
                    // both would double-count it.
                    action(NodeRef::Expression(replacement), state);
                }
                AugmentedExpression::FalseByConstruction(inner)
                | AugmentedExpression::TrueByConstruction(inner)
                | AugmentedExpression::ArbitraryExpression(inner) => {
                    action(NodeRef::Expression(inner), state);
                }
            },
        },
        NodeRef::LhsExpression(lhs) => match lhs {
            LhsExpression::Identifier(_) => {}
            LhsExpression::Paren(inner)
            | LhsExpression::Deref(inner)
            | LhsExpression::AddressOf(inner) => {
                action(NodeRef::LhsExpression(inner), state);
            }
            LhsExpression::Member { base, .. } => {
                action(NodeRef::LhsExpression(base), state);
            }
            LhsExpression::Index { base, index } => {
                action(NodeRef::LhsExpression(base), state);
                action(NodeRef::Expression(index), state);
            }
        },
        NodeRef::TypeDecl(ty) => {
            for arg in &ty.template {
                match arg {
                    TemplateArg::Type(t) => action(NodeRef::TypeDecl(t), state),
                    TemplateArg::Expression(e) => action(NodeRef::Expression(e), state),
                }
            }
        }
        NodeRef::Attribute(attr) => {
            for arg in &attr.args {
                action(NodeRef::Expression(arg), state);
            }
        }
    }
}

fn count_into(node: NodeRef<'_>, count: &mut usize) {
    *count += 1;
    visit_children(&mut |child, state| count_into(child, state), node, count);
}

/// Number of AST nodes in the tree; the reducer's size metric.
pub fn node_count(tu: &TranslationUnit) -> usize {
    let mut count = 0;
    count_into(NodeRef::TranslationUnit(tu), &mut count);
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_suffixes() {
        assert_eq!(Expression::IntLiteral("1".into()).literal_suffix(), None);
        assert_eq!(Expression::IntLiteral("1u".into()).literal_suffix(), Some('u'));
        assert_eq!(Expression::IntLiteral("0x2i".into()).literal_suffix(), Some('i'));
        assert_eq!(Expression::FloatLiteral("1.0".into()).literal_suffix(), None);
        assert_eq!(Expression::FloatLiteral("1.0f".into()).literal_suffix(), Some('f'));
        assert_eq!(Expression::FloatLiteral("2h".into()).literal_suffix(), Some('h'));
    }

    #[test]
    fn node_count_counts_children() {
        let expr = Rc::new(Expression::Binary {
            operator: BinaryOperator::Add,
            lhs: Rc::new(Expression::IntLiteral("1".into())),
            rhs: Rc::new(Expression::IntLiteral("2".into())),
        });
        let tu = TranslationUnit {
            directives: vec![],
            declarations: vec![Rc::new(GlobalDecl::Constant {
                name: "x".into(),
                ty: None,
                initializer: expr,
            })],
        };
        // unit + decl + binary + two literals
        assert_eq!(node_count(&tu), 5);
    }
}
