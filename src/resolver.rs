//! Name and type resolution.
//!
//! `resolve` builds a [`ResolvedEnvironment`]: a scope for every statement,
//! a type for every value expression, and a signature for every function.
//! Module-level declarations are processed in dependency order so that a
//! declaration may freely refer to names introduced later in the source.

use indexmap::IndexMap;
use smol_str::SmolStr;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tracing::debug;

use crate::ast::{
    AugmentedExpression, Expression, FormalParameter, FunctionDecl, GlobalDecl, LhsExpression,
    NodeRef, Statement, TemplateArg, TranslationUnit, TypeDecl, ValueDeclKind,
};
use crate::builtins;
use crate::error::{Error, Result};
use crate::types::{
    find_common_type, AccessMode, AddressSpace, DepthTextureDimension, FunctionType,
    SampledTextureDimension, StorageTextureDimension, StructMember, StructType, TexelFormat, Type,
};
use std::str::FromStr;

/// Identity key of an AST node: the node's allocation address. Only
/// meaningful while the tree that owns the node is alive.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct NodeKey(usize);

impl NodeKey {
    pub fn of_expression(e: &Expression) -> NodeKey {
        NodeKey(e as *const Expression as usize)
    }

    pub fn of_lhs(e: &LhsExpression) -> NodeKey {
        NodeKey(e as *const LhsExpression as usize)
    }

    pub fn of_statement(s: &Statement) -> NodeKey {
        NodeKey(s as *const Statement as usize)
    }
}

/// What a name denotes.
#[derive(Clone, Debug)]
pub enum ScopeEntry {
    GlobalConstant {
        ty: Type,
        /// Const-evaluated integer value, when the initializer folds.
        value: Option<i64>,
    },
    GlobalOverride {
        ty: Type,
    },
    GlobalVariable {
        store: Type,
        space: AddressSpace,
        access: AccessMode,
    },
    LocalValue {
        ty: Type,
        kind: ValueDeclKind,
    },
    LocalVariable {
        store: Type,
    },
    Parameter {
        ty: Type,
        /// The `@builtin(...)` value name, if any.
        builtin: Option<SmolStr>,
    },
    Function(Rc<FunctionType>),
    Struct(Rc<StructType>),
    TypeAlias(Type),
}

/// A persistent scope chain; every declaration links a new scope in front
/// of the previous one, so a snapshot taken at statement entry stays valid.
#[derive(Debug)]
pub struct Scope {
    parent: Option<Rc<Scope>>,
    entries: IndexMap<SmolStr, ScopeEntry>,
}

impl Scope {
    fn root() -> Rc<Scope> {
        Rc::new(Scope {
            parent: None,
            entries: IndexMap::new(),
        })
    }

    fn with(self: &Rc<Scope>, name: SmolStr, entry: ScopeEntry) -> Rc<Scope> {
        let mut entries = IndexMap::new();
        entries.insert(name, entry);
        Rc::new(Scope {
            parent: Some(self.clone()),
            entries,
        })
    }

    pub fn lookup(&self, name: &str) -> Option<&ScopeEntry> {
        self.entries
            .get(name)
            .or_else(|| self.parent.as_deref().and_then(|p| p.lookup(name)))
    }
}

/// Output of [`resolve`].
pub struct ResolvedEnvironment {
    module_scope: Rc<Scope>,
    expr_types: HashMap<NodeKey, Type>,
    lhs_types: HashMap<NodeKey, Type>,
    stmt_scopes: HashMap<NodeKey, Rc<Scope>>,
    function_types: IndexMap<SmolStr, Rc<FunctionType>>,
    /// Function names in call-graph order, callees first.
    function_order: Vec<SmolStr>,
}

impl ResolvedEnvironment {
    pub fn type_of(&self, expression: &Expression) -> Option<&Type> {
        self.expr_types.get(&NodeKey::of_expression(expression))
    }

    pub fn type_of_lhs(&self, lhs: &LhsExpression) -> Option<&Type> {
        self.lhs_types.get(&NodeKey::of_lhs(lhs))
    }

    pub fn scope_before(&self, statement: &Statement) -> Option<&Rc<Scope>> {
        self.stmt_scopes.get(&NodeKey::of_statement(statement))
    }

    pub fn function_type(&self, name: &str) -> Option<&Rc<FunctionType>> {
        self.function_types.get(name)
    }

    pub fn module_scope(&self) -> &Rc<Scope> {
        &self.module_scope
    }

    pub fn function_order(&self) -> &[SmolStr] {
        &self.function_order
    }
}

/// Resolves a translation unit, failing on the first error.
pub fn resolve(tu: &TranslationUnit) -> Result<ResolvedEnvironment> {
    let mut resolver = Resolver::default();
    resolver.run(tu)?;
    let Resolver {
        module_scope,
        expr_types,
        lhs_types,
        stmt_scopes,
        function_types,
        function_order,
    } = resolver;
    Ok(ResolvedEnvironment {
        module_scope: module_scope.expect("module scope built"),
        expr_types,
        lhs_types,
        stmt_scopes,
        function_types,
        function_order,
    })
}

#[derive(Default)]
struct Resolver {
    module_scope: Option<Rc<Scope>>,
    expr_types: HashMap<NodeKey, Type>,
    lhs_types: HashMap<NodeKey, Type>,
    stmt_scopes: HashMap<NodeKey, Rc<Scope>>,
    function_types: IndexMap<SmolStr, Rc<FunctionType>>,
    function_order: Vec<SmolStr>,
}

impl Resolver {
    fn run(&mut self, tu: &TranslationUnit) -> Result<()> {
        check_duplicate_names(tu)?;
        let order = dependency_order(tu)?;
        debug!(?order, "module declaration order");

        // Header pass: non-functions resolve fully, functions get their
        // signatures installed; all in dependency order.
        let mut scope = Scope::root();
        for index in order {
            let decl = &tu.declarations[index];
            scope = self.resolve_global(decl, scope)?;
        }

        // Module-level const asserts after every name is known.
        for decl in &tu.declarations {
            if let GlobalDecl::ConstAssert { expression } = &**decl {
                self.resolve_expression(expression, &scope)?;
            }
        }

        self.module_scope = Some(scope.clone());

        // Body pass, in source order.
        for decl in &tu.declarations {
            if let GlobalDecl::Function(function) = &**decl {
                self.resolve_function_body(function, &scope)?;
            }
        }

        self.function_order = call_graph_order(tu);
        Ok(())
    }

    fn resolve_global(&mut self, decl: &GlobalDecl, scope: Rc<Scope>) -> Result<Rc<Scope>> {
        match decl {
            GlobalDecl::Constant {
                name,
                ty,
                initializer,
            } => {
                let init_ty = self.resolve_expression(initializer, &scope)?;
                let declared = match ty {
                    Some(ty) => self.resolve_type_decl(ty, &scope)?,
                    None => init_ty.default_concretization(),
                };
                self.check_initializer(name, &declared, &init_ty)?;
                let value = const_eval_int(initializer, &scope);
                Ok(scope.with(
                    name.clone(),
                    ScopeEntry::GlobalConstant {
                        ty: declared,
                        value,
                    },
                ))
            }
            GlobalDecl::Override {
                name,
                ty,
                initializer,
                ..
            } => {
                let init_ty = match initializer {
                    Some(init) => Some(self.resolve_expression(init, &scope)?),
                    None => None,
                };
                let declared = match (ty, init_ty) {
                    (Some(ty), _) => self.resolve_type_decl(ty, &scope)?,
                    (None, Some(init_ty)) => init_ty.default_concretization(),
                    (None, None) => {
                        return Err(Error::TypeMismatch(format!(
                            "override `{}` needs a type or an initializer",
                            name
                        )))
                    }
                };
                Ok(scope.with(name.clone(), ScopeEntry::GlobalOverride { ty: declared }))
            }
            GlobalDecl::Variable {
                name,
                address_space,
                access_mode,
                ty,
                initializer,
                ..
            } => {
                let init_ty = match initializer {
                    Some(init) => Some(self.resolve_expression(init, &scope)?),
                    None => None,
                };
                let store = match (ty, init_ty) {
                    (Some(ty), _) => self.resolve_type_decl(ty, &scope)?,
                    (None, Some(init_ty)) => init_ty.default_concretization(),
                    (None, None) => {
                        return Err(Error::TypeMismatch(format!(
                            "variable `{}` needs a type or an initializer",
                            name
                        )))
                    }
                };
                // Unspecified module-scope variables default to the handle
                // space with read_write access; uniform and storage
                // variables are readable only unless spelled otherwise.
                let space = (*address_space).unwrap_or(AddressSpace::Handle);
                let access = (*access_mode).unwrap_or(match space {
                    AddressSpace::Uniform | AddressSpace::Storage => AccessMode::Read,
                    _ => AccessMode::ReadWrite,
                });
                Ok(scope.with(
                    name.clone(),
                    ScopeEntry::GlobalVariable {
                        store,
                        space,
                        access,
                    },
                ))
            }
            GlobalDecl::Function(function) => {
                let mut parameters = Vec::with_capacity(function.parameters.len());
                for param in &function.parameters {
                    parameters.push(self.resolve_type_decl(&param.ty, &scope)?);
                }
                let return_type = match &function.return_type {
                    Some(ty) => Some(self.resolve_type_decl(ty, &scope)?),
                    None => None,
                };
                let function_type = Rc::new(FunctionType {
                    parameters,
                    return_type,
                });
                self.function_types
                    .insert(function.name.clone(), function_type.clone());
                Ok(scope.with(function.name.clone(), ScopeEntry::Function(function_type)))
            }
            GlobalDecl::Struct { name, members } => {
                let mut resolved = Vec::with_capacity(members.len());
                for member in members {
                    resolved.push(StructMember {
                        name: member.name.clone(),
                        ty: self.resolve_type_decl(&member.ty, &scope)?,
                    });
                }
                let struct_type = Rc::new(StructType {
                    name: name.clone(),
                    members: resolved,
                });
                Ok(scope.with(name.clone(), ScopeEntry::Struct(struct_type)))
            }
            GlobalDecl::TypeAlias { name, ty } => {
                let aliased = self.resolve_type_decl(ty, &scope)?;
                Ok(scope.with(name.clone(), ScopeEntry::TypeAlias(aliased)))
            }
            GlobalDecl::ConstAssert { .. } | GlobalDecl::Empty => Ok(scope),
        }
    }

    fn resolve_function_body(&mut self, function: &FunctionDecl, module: &Rc<Scope>) -> Result<()> {
        let function_type = self
            .function_types
            .get(&function.name)
            .cloned()
            .ok_or_else(|| {
                Error::ResolverInternal(format!("missing signature for `{}`", function.name))
            })?;
        let mut scope = module.clone();
        for (param, ty) in function.parameters.iter().zip(&function_type.parameters) {
            scope = scope.with(
                param.name.clone(),
                ScopeEntry::Parameter {
                    ty: ty.clone(),
                    builtin: builtin_value_attribute(param),
                },
            );
        }
        self.resolve_statement(&function.body, scope)?;
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Statements
    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Resolves one statement and returns the scope visible *after* it
    /// (extended by any declaration it introduces). The scope at entry is
    /// recorded for the statement itself.
    fn resolve_statement(&mut self, statement: &Rc<Statement>, scope: Rc<Scope>) -> Result<Rc<Scope>> {
        self.stmt_scopes
            .insert(NodeKey::of_statement(statement), scope.clone());
        match &**statement {
            Statement::Compound(compound) => {
                let mut inner = scope.clone();
                for s in &compound.statements {
                    inner = self.resolve_statement(s, inner)?;
                }
                Ok(scope)
            }
            Statement::Empty | Statement::Break | Statement::Continue | Statement::Discard => {
                Ok(scope)
            }
            Statement::Return { expression } => {
                if let Some(expression) = expression {
                    self.resolve_expression(expression, &scope)?;
                }
                Ok(scope)
            }
            Statement::ValueDecl {
                kind,
                name,
                ty,
                initializer,
            } => {
                let init_ty = self.resolve_expression(initializer, &scope)?;
                let declared = match ty {
                    Some(ty) => self.resolve_type_decl(ty, &scope)?,
                    None => init_ty.default_concretization(),
                };
                self.check_initializer(name, &declared, &init_ty)?;
                Ok(scope.with(
                    name.clone(),
                    ScopeEntry::LocalValue {
                        ty: declared,
                        kind: *kind,
                    },
                ))
            }
            Statement::Variable {
                name,
                ty,
                initializer,
            } => {
                let init_ty = match initializer {
                    Some(init) => Some(self.resolve_expression(init, &scope)?),
                    None => None,
                };
                let store = match ty {
                    Some(ty) => {
                        let declared = self.resolve_type_decl(ty, &scope)?;
                        if let Some(init_ty) = &init_ty {
                            self.check_initializer(name, &declared, init_ty)?;
                        }
                        declared
                    }
                    None => match &init_ty {
                        Some(init_ty) => init_ty.default_concretization(),
                        None => {
                            return Err(Error::TypeMismatch(format!(
                                "variable `{}` needs a type or an initializer",
                                name
                            )))
                        }
                    },
                };
                Ok(scope.with(name.clone(), ScopeEntry::LocalVariable { store }))
            }
            Statement::Assignment { lhs, rhs, .. } => {
                let rhs_ty = self.resolve_expression(rhs, &scope)?;
                if let Some(lhs) = lhs {
                    let lhs_ty = self.resolve_lhs(lhs, &scope)?;
                    let store = match &lhs_ty {
                        Type::Reference { store, .. } => (**store).clone(),
                        other => {
                            return Err(Error::TypeMismatch(format!(
                                "cannot assign to a target of type `{}`",
                                other
                            )))
                        }
                    };
                    if find_common_type(&[store.clone(), rhs_ty.clone()]).is_err() {
                        return Err(Error::TypeMismatch(format!(
                            "cannot assign `{}` to a target of type `{}`",
                            rhs_ty, store
                        )));
                    }
                }
                Ok(scope)
            }
            Statement::Increment { target } | Statement::Decrement { target } => {
                self.resolve_lhs(target, &scope)?;
                Ok(scope)
            }
            Statement::FunctionCall {
                callee,
                template,
                arguments,
            } => {
                let mut arg_types = Vec::with_capacity(arguments.len());
                for arg in arguments {
                    arg_types.push(self.resolve_expression(arg, &scope)?);
                }
                let template_ty = match template {
                    Some(ty) => Some(self.resolve_type_decl(ty, &scope)?),
                    None => None,
                };
                self.type_call(callee, template_ty.as_ref(), &arg_types, &scope)?;
                Ok(scope)
            }
            Statement::For {
                initializer,
                condition,
                update,
                body,
            } => {
                // The header shares its scope with the body.
                let mut header = scope.clone();
                if let Some(init) = initializer {
                    header = self.resolve_statement(init, header)?;
                }
                if let Some(condition) = condition {
                    self.resolve_expression(condition, &header)?;
                }
                if let Some(update) = update {
                    self.resolve_statement(update, header.clone())?;
                }
                self.resolve_statement(body, header)?;
                Ok(scope)
            }
            Statement::While { condition, body } => {
                self.resolve_expression(condition, &scope)?;
                self.resolve_statement(body, scope.clone())?;
                Ok(scope)
            }
            Statement::Loop { body, continuing } => {
                // Loop bodies are a statement sequence, not a compound, so
                // the continuing block sees the body's declarations.
                let mut inner = scope.clone();
                for s in body {
                    inner = self.resolve_statement(s, inner)?;
                }
                if let Some(continuing) = continuing {
                    for s in &continuing.statements {
                        inner = self.resolve_statement(s, inner)?;
                    }
                    if let Some(break_if) = &continuing.break_if {
                        self.resolve_expression(break_if, &inner)?;
                    }
                }
                Ok(scope)
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expression(condition, &scope)?;
                self.resolve_statement(then_branch, scope.clone())?;
                if let Some(else_branch) = else_branch {
                    self.resolve_statement(else_branch, scope.clone())?;
                }
                Ok(scope)
            }
            Statement::Switch { selector, clauses } => {
                self.resolve_expression(selector, &scope)?;
                for clause in clauses {
                    if let crate::ast::CaseSelectors::Expressions(exprs) = &clause.selectors {
                        for e in exprs.iter().flatten() {
                            self.resolve_expression(e, &scope)?;
                        }
                    }
                    self.resolve_statement(&clause.body, scope.clone())?;
                }
                Ok(scope)
            }
            Statement::ConstAssert { expression } => {
                self.resolve_expression(expression, &scope)?;
                Ok(scope)
            }
            Statement::DeadCodeFragment { body }
            | Statement::ControlFlowWrapper { body, .. }
            | Statement::ControlFlowWrapReturn { body, .. }
            | Statement::ControlFlowWrapHelperStatement { body, .. } => {
                self.resolve_statement(body, scope.clone())?;
                Ok(scope)
            }
        }
    }

    fn check_initializer(&self, name: &str, declared: &Type, init: &Type) -> Result<()> {
        if find_common_type(&[declared.clone(), init.clone()]).is_err() {
            return Err(Error::TypeMismatch(format!(
                "initializer of `{}` has type `{}`, expected `{}`",
                name, init, declared
            )));
        }
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Expressions
    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn record_expression(&mut self, expression: &Expression, ty: Type) -> Result<Type> {
        let key = NodeKey::of_expression(expression);
        if self.expr_types.insert(key, ty.clone()).is_some() {
            return Err(Error::ResolverInternal(
                "expression type recorded twice".to_string(),
            ));
        }
        Ok(ty)
    }

    /// Types a value expression and records the result. The load rule is
    /// applied before recording, so identifiers naming variables record
    /// their store type.
    fn resolve_expression(&mut self, expression: &Rc<Expression>, scope: &Rc<Scope>) -> Result<Type> {
        let ty = self.type_expression(expression, scope)?;
        self.record_expression(expression, ty)
    }

    fn type_expression(&mut self, expression: &Rc<Expression>, scope: &Rc<Scope>) -> Result<Type> {
        match &**expression {
            Expression::BoolLiteral(_) => Ok(Type::Bool),
            Expression::IntLiteral(_) => Ok(match expression.literal_suffix() {
                Some('i') => Type::I32,
                Some('u') => Type::U32,
                _ => Type::AbstractInt,
            }),
            Expression::FloatLiteral(_) => Ok(match expression.literal_suffix() {
                Some('f') => Type::F32,
                Some('h') => Type::F16,
                _ => Type::AbstractFloat,
            }),
            Expression::Identifier(name) => match scope.lookup(name) {
                Some(ScopeEntry::GlobalConstant { ty, .. })
                | Some(ScopeEntry::GlobalOverride { ty })
                | Some(ScopeEntry::LocalValue { ty, .. })
                | Some(ScopeEntry::Parameter { ty, .. }) => Ok(ty.clone()),
                Some(ScopeEntry::LocalVariable { store })
                | Some(ScopeEntry::GlobalVariable { store, .. }) => {
                    // Load rule: a readable reference used as a value
                    // yields its store type.
                    Ok(store.clone())
                }
                Some(ScopeEntry::Function(_)) => Err(Error::TypeMismatch(format!(
                    "function `{}` used as a value",
                    name
                ))),
                Some(ScopeEntry::Struct(_)) | Some(ScopeEntry::TypeAlias(_)) => Err(
                    Error::TypeMismatch(format!("type `{}` used as a value", name)),
                ),
                None => Err(Error::UnknownIdentifier(name.clone())),
            },
            Expression::Paren(inner) => self.resolve_expression(inner, scope),
            Expression::Unary { operator, operand } => {
                use crate::ast::UnaryOperator::*;
                match operator {
                    Negate | Complement => self.resolve_expression(operand, scope),
                    Not => {
                        // !e on vectors is component-wise.
                        Ok(match self.resolve_expression(operand, scope)? {
                            Type::Vector { size, .. } => Type::vector(size, Type::Bool),
                            _ => Type::Bool,
                        })
                    }
                    AddressOf => {
                        let pointee = self.resolve_expression(operand, scope)?;
                        let (space, access) = self.address_space_of(operand, scope)?;
                        Ok(Type::pointer(space, pointee, access))
                    }
                    Deref => {
                        let ty = self.resolve_expression(operand, scope)?;
                        match ty {
                            Type::Pointer { pointee, .. } => Ok((*pointee).clone()),
                            other => Err(Error::TypeMismatch(format!(
                                "cannot dereference a value of type `{}`",
                                other
                            ))),
                        }
                    }
                }
            }
            Expression::Binary { operator, lhs, rhs } => {
                let l = self.resolve_expression(lhs, scope)?;
                let r = self.resolve_expression(rhs, scope)?;
                self.type_binary(*operator, &l, &r)
            }
            Expression::Member { base, member } => {
                let base_ty = self.resolve_expression(base, scope)?;
                type_member(&base_ty, member)
            }
            Expression::Index { base, index } => {
                let base_ty = self.resolve_expression(base, scope)?;
                self.resolve_expression(index, scope)?;
                match base_ty {
                    Type::Array { elem, .. } => Ok((*elem).clone()),
                    Type::Vector { elem, .. } => Ok((*elem).clone()),
                    Type::Matrix { rows, elem, .. } => Ok(Type::vector(rows, (*elem).clone())),
                    other => Err(Error::TypeMismatch(format!(
                        "cannot index a value of type `{}`",
                        other
                    ))),
                }
            }
            Expression::FunctionCall {
                callee,
                template,
                arguments,
            } => {
                let mut arg_types = Vec::with_capacity(arguments.len());
                for arg in arguments {
                    arg_types.push(self.resolve_expression(arg, scope)?);
                }
                let template_ty = match template {
                    Some(ty) => Some(self.resolve_type_decl(ty, scope)?),
                    None => None,
                };
                match self.type_call(callee, template_ty.as_ref(), &arg_types, scope)? {
                    Some(ty) => Ok(ty),
                    None => Err(Error::TypeMismatch(format!(
                        "call to `{}` does not produce a value",
                        callee
                    ))),
                }
            }
            Expression::TypeConstructor { ty, arguments } => {
                let mut arg_types = Vec::with_capacity(arguments.len());
                for arg in arguments {
                    arg_types.push(self.resolve_expression(arg, scope)?);
                }
                self.type_constructor(ty, &arg_types, scope)
            }
            Expression::Augmented(augmented) => match augmented {
                AugmentedExpression::AddZero { original, zero, .. }
                | AugmentedExpression::SubZero { original, zero } => {
                    let ty = self.resolve_expression(original, scope)?;
                    self.resolve_expression(zero, scope)?;
                    Ok(ty)
                }
                AugmentedExpression::MulOne { original, one, .. }
                | AugmentedExpression::DivOne { original, one } => {
                    let ty = self.resolve_expression(original, scope)?;
                    self.resolve_expression(one, scope)?;
                    Ok(ty)
                }
                AugmentedExpression::KnownValue { expression, value } => {
                    let ty = self.resolve_expression(expression, scope)?;
                    self.resolve_expression(value, scope)?;
                    Ok(ty)
                }
                AugmentedExpression::IdentityOperation { replacement, .. } => {
                    // `original` is a shared subtree of `replacement` and is
                    // typed while resolving it.
                    self.resolve_expression(replacement, scope)
                }
                AugmentedExpression::FalseByConstruction(inner)
                | AugmentedExpression::TrueByConstruction(inner) => {
                    self.resolve_expression(inner, scope)?;
                    Ok(Type::Bool)
                }
                AugmentedExpression::ArbitraryExpression(inner) => {
                    self.resolve_expression(inner, scope)
                }
            },
        }
    }

    fn type_binary(&self, operator: crate::ast::BinaryOperator, l: &Type, r: &Type) -> Result<Type> {
        use crate::ast::BinaryOperator::*;
        match operator {
            ShortCircuitAnd | ShortCircuitOr => Ok(Type::Bool),
            Equal | NotEqual | LessThan | GreaterThan | LessEqual | GreaterEqual => {
                let common = common_arithmetic_type(l, r)?;
                Ok(match common {
                    Type::Vector { size, .. } => Type::vector(size, Type::Bool),
                    _ => Type::Bool,
                })
            }
            ShiftLeft | ShiftRight => Ok(l.clone()),
            Mul => type_multiplication(l, r),
            Add | Sub | Div | Mod | BitAnd | BitOr | BitXor => common_arithmetic_type(l, r),
        }
    }

    /// Walks through parens, member/index lookups and nested `&`/`*` to
    /// the root identifier, and derives the pointer's address space and
    /// access mode from its scope entry.
    fn address_space_of(
        &self,
        operand: &Rc<Expression>,
        scope: &Rc<Scope>,
    ) -> Result<(AddressSpace, AccessMode)> {
        match &**operand {
            Expression::Identifier(name) => match scope.lookup(name) {
                Some(ScopeEntry::LocalVariable { .. }) => {
                    Ok((AddressSpace::Function, AccessMode::ReadWrite))
                }
                Some(ScopeEntry::GlobalVariable { space, access, .. }) => Ok((*space, *access)),
                Some(ScopeEntry::LocalValue {
                    ty: Type::Pointer { space, access, .. },
                    ..
                })
                | Some(ScopeEntry::Parameter {
                    ty: Type::Pointer { space, access, .. },
                    ..
                }) => Ok((*space, *access)),
                Some(_) => Err(Error::TypeMismatch(format!(
                    "cannot take the address of `{}`",
                    name
                ))),
                None => Err(Error::UnknownIdentifier(name.clone())),
            },
            Expression::Paren(inner)
            | Expression::Member { base: inner, .. }
            | Expression::Index { base: inner, .. } => self.address_space_of(inner, scope),
            Expression::Unary {
                operator: crate::ast::UnaryOperator::Deref | crate::ast::UnaryOperator::AddressOf,
                operand: inner,
            } => self.address_space_of(inner, scope),
            other => Err(Error::TypeMismatch(format!(
                "cannot take the address of expression {:?}",
                other
            ))),
        }
    }

    /// Types a call to a user function, a struct/alias value constructor,
    /// or a builtin. `Ok(None)` means the callee returns no value.
    fn type_call(
        &mut self,
        callee: &SmolStr,
        template: Option<&Type>,
        args: &[Type],
        scope: &Rc<Scope>,
    ) -> Result<Option<Type>> {
        match scope.lookup(callee) {
            Some(ScopeEntry::Function(ft)) => Ok(ft.return_type.clone()),
            Some(ScopeEntry::Struct(s)) => Ok(Some(Type::Struct(s.clone()))),
            Some(ScopeEntry::TypeAlias(ty)) => Ok(Some(ty.clone())),
            _ => builtins::call_return_type(callee, template, args),
        }
    }

    /// Types a `TypeConstructor` expression; infers the element type from
    /// the arguments when the head carries no template.
    fn type_constructor(
        &mut self,
        ty: &Rc<TypeDecl>,
        args: &[Type],
        scope: &Rc<Scope>,
    ) -> Result<Type> {
        let name = ty.name.as_str();
        if ty.template.is_empty() {
            if let Some(size) = vector_size(name) {
                let elem = infer_element_type(args)?;
                return Ok(Type::vector(size, elem));
            }
            if let Some((columns, rows)) = matrix_shape(name) {
                let elem = match infer_element_type(args)? {
                    Type::AbstractInt => Type::AbstractFloat,
                    other => other,
                };
                return Ok(Type::matrix(columns, rows, elem));
            }
            if name == "array" {
                let elem = infer_element_type(args)?;
                return Ok(Type::array(elem, Some(args.len() as u32)));
            }
        }
        self.resolve_type_decl(ty, scope)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // LHS expressions
    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn record_lhs(&mut self, lhs: &LhsExpression, ty: Type) -> Result<Type> {
        let key = NodeKey::of_lhs(lhs);
        if self.lhs_types.insert(key, ty.clone()).is_some() {
            return Err(Error::ResolverInternal(
                "assignment target type recorded twice".to_string(),
            ));
        }
        Ok(ty)
    }

    fn resolve_lhs(&mut self, lhs: &Rc<LhsExpression>, scope: &Rc<Scope>) -> Result<Type> {
        let ty = self.type_lhs(lhs, scope)?;
        self.record_lhs(lhs, ty)
    }

    fn type_lhs(&mut self, lhs: &Rc<LhsExpression>, scope: &Rc<Scope>) -> Result<Type> {
        match &**lhs {
            LhsExpression::Identifier(name) => match scope.lookup(name) {
                Some(ScopeEntry::LocalVariable { store }) => Ok(Type::reference(
                    AddressSpace::Function,
                    store.clone(),
                    AccessMode::ReadWrite,
                )),
                Some(ScopeEntry::GlobalVariable {
                    store,
                    space,
                    access,
                }) => Ok(Type::reference(*space, store.clone(), *access)),
                Some(ScopeEntry::LocalValue { ty, .. })
                | Some(ScopeEntry::Parameter { ty, .. }) => Ok(ty.clone()),
                Some(_) => Err(Error::TypeMismatch(format!(
                    "`{}` is not an assignable target",
                    name
                ))),
                None => Err(Error::UnknownIdentifier(name.clone())),
            },
            LhsExpression::Paren(inner) => self.resolve_lhs(inner, scope),
            LhsExpression::Member { base, member } => {
                let base_ty = self.resolve_lhs(base, scope)?;
                match base_ty {
                    Type::Reference {
                        space,
                        store,
                        access,
                    } => {
                        let member_ty = type_member(&store, member)?;
                        Ok(Type::reference(space, member_ty, access))
                    }
                    other => Err(Error::TypeMismatch(format!(
                        "cannot access a member of `{}` here",
                        other
                    ))),
                }
            }
            LhsExpression::Index { base, index } => {
                self.resolve_expression(index, scope)?;
                let base_ty = self.resolve_lhs(base, scope)?;
                match base_ty {
                    Type::Reference {
                        space,
                        store,
                        access,
                    } => {
                        let elem = match &*store {
                            Type::Array { elem, .. } => (**elem).clone(),
                            Type::Vector { elem, .. } => (**elem).clone(),
                            Type::Matrix { rows, elem, .. } => {
                                Type::vector(*rows, (**elem).clone())
                            }
                            other => {
                                return Err(Error::TypeMismatch(format!(
                                    "cannot index a target of type `{}`",
                                    other
                                )))
                            }
                        };
                        Ok(Type::reference(space, elem, access))
                    }
                    other => Err(Error::TypeMismatch(format!(
                        "cannot index a target of type `{}`",
                        other
                    ))),
                }
            }
            LhsExpression::Deref(inner) => {
                let inner_ty = self.resolve_lhs(inner, scope)?;
                match inner_ty.store_type() {
                    Type::Pointer {
                        space,
                        pointee,
                        access,
                    } => Ok(Type::reference(*space, (**pointee).clone(), *access)),
                    other => Err(Error::TypeMismatch(format!(
                        "cannot dereference a target of type `{}`",
                        other
                    ))),
                }
            }
            LhsExpression::AddressOf(inner) => {
                let inner_ty = self.resolve_lhs(inner, scope)?;
                match inner_ty {
                    Type::Reference {
                        space,
                        store,
                        access,
                    } => Ok(Type::Pointer {
                        space,
                        pointee: store,
                        access,
                    }),
                    other => Err(Error::TypeMismatch(format!(
                        "cannot take the address of a target of type `{}`",
                        other
                    ))),
                }
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Type declarations
    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn resolve_type_decl(&mut self, decl: &Rc<TypeDecl>, scope: &Rc<Scope>) -> Result<Type> {
        let name = decl.name.as_str();
        match name {
            "bool" => Ok(Type::Bool),
            "i32" => Ok(Type::I32),
            "u32" => Ok(Type::U32),
            "f32" => Ok(Type::F32),
            "f16" => Ok(Type::F16),
            "sampler" => Ok(Type::Sampler),
            "sampler_comparison" => Ok(Type::SamplerComparison),
            "texture_external" => Ok(Type::ExternalTexture),
            "texture_depth_2d" => Ok(Type::DepthTexture {
                dim: DepthTextureDimension::D2,
            }),
            "texture_depth_2d_array" => Ok(Type::DepthTexture {
                dim: DepthTextureDimension::D2Array,
            }),
            "texture_depth_cube" => Ok(Type::DepthTexture {
                dim: DepthTextureDimension::Cube,
            }),
            "texture_depth_cube_array" => Ok(Type::DepthTexture {
                dim: DepthTextureDimension::CubeArray,
            }),
            "texture_depth_multisampled_2d" => Ok(Type::DepthMultisampledTexture),
            "vec2" | "vec3" | "vec4" => {
                let size = vector_size(name).unwrap();
                let elem = self.single_type_template(decl, scope)?;
                Ok(Type::vector(size, elem))
            }
            "atomic" => {
                let elem = self.single_type_template(decl, scope)?;
                match elem {
                    Type::I32 | Type::U32 => Ok(Type::Atomic {
                        elem: Box::new(elem),
                    }),
                    other => Err(Error::TypeMismatch(format!(
                        "atomic element must be i32 or u32, not `{}`",
                        other
                    ))),
                }
            }
            "array" => {
                let elem = match decl.template.first() {
                    Some(TemplateArg::Type(t)) => self.resolve_type_decl(t, scope)?,
                    _ => {
                        return Err(Error::TypeMismatch(
                            "array needs an element type".to_string(),
                        ))
                    }
                };
                let count = match decl.template.get(1) {
                    None => None,
                    Some(arg) => self.template_count(arg, scope)?,
                };
                Ok(Type::array(elem, count))
            }
            "ptr" => {
                let space = match decl.template.first() {
                    Some(TemplateArg::Type(t)) if t.template.is_empty() => {
                        AddressSpace::from_str(&t.name).map_err(|_| {
                            Error::TypeMismatch(format!("unknown address space `{}`", t.name))
                        })?
                    }
                    _ => {
                        return Err(Error::TypeMismatch(
                            "ptr needs an address space".to_string(),
                        ))
                    }
                };
                let pointee = match decl.template.get(1) {
                    Some(TemplateArg::Type(t)) => self.resolve_type_decl(t, scope)?,
                    _ => return Err(Error::TypeMismatch("ptr needs a store type".to_string())),
                };
                let access = match decl.template.get(2) {
                    Some(TemplateArg::Type(t)) if t.template.is_empty() => {
                        AccessMode::from_str(&t.name).map_err(|_| {
                            Error::TypeMismatch(format!("unknown access mode `{}`", t.name))
                        })?
                    }
                    Some(_) => {
                        return Err(Error::TypeMismatch("malformed ptr access mode".to_string()))
                    }
                    None => default_access_mode(space),
                };
                Ok(Type::pointer(space, pointee, access))
            }
            "texture_1d" | "texture_2d" | "texture_2d_array" | "texture_3d" | "texture_cube"
            | "texture_cube_array" => {
                let sampled = self.single_type_template(decl, scope)?;
                let dim = match name {
                    "texture_1d" => SampledTextureDimension::D1,
                    "texture_2d" => SampledTextureDimension::D2,
                    "texture_2d_array" => SampledTextureDimension::D2Array,
                    "texture_3d" => SampledTextureDimension::D3,
                    "texture_cube" => SampledTextureDimension::Cube,
                    _ => SampledTextureDimension::CubeArray,
                };
                Ok(Type::SampledTexture {
                    dim,
                    sampled: Box::new(sampled),
                })
            }
            "texture_multisampled_2d" => {
                let sampled = self.single_type_template(decl, scope)?;
                Ok(Type::MultisampledTexture {
                    sampled: Box::new(sampled),
                })
            }
            "texture_storage_1d" | "texture_storage_2d" | "texture_storage_2d_array"
            | "texture_storage_3d" => {
                let format = match decl.template.first() {
                    Some(TemplateArg::Type(t)) if t.template.is_empty() => {
                        TexelFormat::from_str(&t.name).map_err(|_| {
                            Error::TypeMismatch(format!("unknown texel format `{}`", t.name))
                        })?
                    }
                    _ => {
                        return Err(Error::TypeMismatch(
                            "storage texture needs a texel format".to_string(),
                        ))
                    }
                };
                let access = match decl.template.get(1) {
                    Some(TemplateArg::Type(t)) if t.template.is_empty() => {
                        AccessMode::from_str(&t.name).map_err(|_| {
                            Error::TypeMismatch(format!("unknown access mode `{}`", t.name))
                        })?
                    }
                    _ => {
                        return Err(Error::TypeMismatch(
                            "storage texture needs an access mode".to_string(),
                        ))
                    }
                };
                let dim = match name {
                    "texture_storage_1d" => StorageTextureDimension::D1,
                    "texture_storage_2d" => StorageTextureDimension::D2,
                    "texture_storage_2d_array" => StorageTextureDimension::D2Array,
                    _ => StorageTextureDimension::D3,
                };
                Ok(Type::StorageTexture {
                    dim,
                    format,
                    access,
                })
            }
            _ => {
                if let Some((columns, rows)) = matrix_shape(name) {
                    let elem = self.single_type_template(decl, scope)?;
                    return Ok(Type::matrix(columns, rows, elem));
                }
                if let Some(ty) = shorthand_type(name) {
                    return Ok(ty);
                }
                match scope.lookup(name) {
                    Some(ScopeEntry::Struct(s)) => Ok(Type::Struct(s.clone())),
                    Some(ScopeEntry::TypeAlias(ty)) => Ok(ty.clone()),
                    _ => Err(Error::UnknownType(decl.name.clone())),
                }
            }
        }
    }

    fn single_type_template(&mut self, decl: &Rc<TypeDecl>, scope: &Rc<Scope>) -> Result<Type> {
        match decl.template.first() {
            Some(TemplateArg::Type(t)) => self.resolve_type_decl(t, scope),
            _ => Err(Error::TypeMismatch(format!(
                "`{}` requires a template argument",
                decl.name
            ))),
        }
    }

    /// An array-count template argument: a literal/folded expression, a
    /// module constant, or an override (unevaluable, hence runtime-sized).
    fn template_count(&mut self, arg: &TemplateArg, scope: &Rc<Scope>) -> Result<Option<u32>> {
        match arg {
            TemplateArg::Expression(e) => {
                self.resolve_expression(e, scope)?;
                Ok(const_eval_int(e, scope).and_then(|v| u32::try_from(v).ok()))
            }
            TemplateArg::Type(t) if t.template.is_empty() => match scope.lookup(&t.name) {
                Some(ScopeEntry::GlobalConstant { value, .. }) => {
                    Ok(value.and_then(|v| u32::try_from(v).ok()))
                }
                Some(ScopeEntry::GlobalOverride { .. }) => Ok(None),
                _ => Err(Error::UnknownIdentifier(t.name.clone())),
            },
            TemplateArg::Type(t) => Err(Error::TypeMismatch(format!(
                "`{}` is not a valid array count",
                t.name
            ))),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Free helpers
////////////////////////////////////////////////////////////////////////////////////////////////////

fn builtin_value_attribute(param: &FormalParameter) -> Option<SmolStr> {
    for attr in &param.attributes {
        if attr.name == "builtin" {
            if let Some(arg) = attr.args.first() {
                if let Expression::Identifier(name) = &**arg {
                    return Some(name.clone());
                }
            }
        }
    }
    None
}

fn vector_size(name: &str) -> Option<u8> {
    match name {
        "vec2" => Some(2),
        "vec3" => Some(3),
        "vec4" => Some(4),
        _ => None,
    }
}

fn matrix_shape(name: &str) -> Option<(u8, u8)> {
    let dims = name.strip_prefix("mat")?;
    let mut chars = dims.chars();
    let columns = chars.next()?.to_digit(10)? as u8;
    if chars.next()? != 'x' {
        return None;
    }
    let rows = chars.next()?.to_digit(10)? as u8;
    if chars.next().is_some() || !(2..=4).contains(&columns) || !(2..=4).contains(&rows) {
        return None;
    }
    Some((columns, rows))
}

/// `vec3f`, `vec2i`, `mat4x4h` and friends.
fn shorthand_type(name: &str) -> Option<Type> {
    let suffix = name.chars().last()?;
    let head = &name[..name.len() - 1];
    let elem = match suffix {
        'f' => Type::F32,
        'h' => Type::F16,
        'i' => Type::I32,
        'u' => Type::U32,
        _ => return None,
    };
    if let Some(size) = vector_size(head) {
        return Some(Type::vector(size, elem));
    }
    if matches!(suffix, 'f' | 'h') {
        if let Some((columns, rows)) = matrix_shape(head) {
            return Some(Type::matrix(columns, rows, elem));
        }
    }
    None
}

fn default_access_mode(space: AddressSpace) -> AccessMode {
    match space {
        AddressSpace::Uniform | AddressSpace::Storage => AccessMode::Read,
        _ => AccessMode::ReadWrite,
    }
}

fn type_member(base: &Type, member: &str) -> Result<Type> {
    match base {
        Type::Struct(s) => s
            .member(member)
            .cloned()
            .ok_or_else(|| Error::TypeMismatch(format!("`{}` has no member `{}`", s.name, member))),
        Type::Vector { size, elem } => {
            let width = *size as usize;
            let len = member.len();
            let valid = (1..=4).contains(&len)
                && (member.chars().all(|c| "xyzw"[..width].contains(c))
                    || member.chars().all(|c| "rgba"[..width].contains(c)));
            if !valid {
                return Err(Error::TypeMismatch(format!(
                    "invalid vector member `{}`",
                    member
                )));
            }
            if len == 1 {
                Ok((**elem).clone())
            } else {
                Ok(Type::vector(len as u8, (**elem).clone()))
            }
        }
        other => Err(Error::TypeMismatch(format!(
            "cannot access member `{}` of `{}`",
            member, other
        ))),
    }
}

/// Arithmetic operand combination: identical/concretizable types, or a
/// scalar broadcast against a vector.
fn common_arithmetic_type(l: &Type, r: &Type) -> Result<Type> {
    if let Ok(common) = find_common_type(&[l.clone(), r.clone()]) {
        return Ok(common);
    }
    match (l, r) {
        (Type::Vector { size, elem }, scalar) if scalar.is_scalar() => {
            let elem = find_common_type(&[(**elem).clone(), scalar.clone()])?;
            Ok(Type::vector(*size, elem))
        }
        (scalar, Type::Vector { size, elem }) if scalar.is_scalar() => {
            let elem = find_common_type(&[(**elem).clone(), scalar.clone()])?;
            Ok(Type::vector(*size, elem))
        }
        _ => Err(Error::NoCommonType(l.to_string(), r.to_string())),
    }
}

/// `*` has the matrix/vector special cases on top of the arithmetic rules.
fn type_multiplication(l: &Type, r: &Type) -> Result<Type> {
    match (l, r) {
        (
            Type::Matrix {
                columns,
                rows,
                elem,
            },
            scalar,
        ) if scalar.is_scalar() => Ok(Type::matrix(*columns, *rows, (**elem).clone())),
        (
            scalar,
            Type::Matrix {
                columns,
                rows,
                elem,
            },
        ) if scalar.is_scalar() => Ok(Type::matrix(*columns, *rows, (**elem).clone())),
        (
            Type::Matrix {
                columns,
                rows,
                elem,
            },
            Type::Vector { size, .. },
        ) if columns == size => Ok(Type::vector(*rows, (**elem).clone())),
        (
            Type::Vector { size, .. },
            Type::Matrix {
                columns,
                rows,
                elem,
            },
        ) if rows == size => Ok(Type::vector(*columns, (**elem).clone())),
        (
            Type::Matrix {
                rows, elem, ..
            },
            Type::Matrix {
                columns: rhs_columns,
                ..
            },
        ) => Ok(Type::matrix(*rhs_columns, *rows, (**elem).clone())),
        _ => common_arithmetic_type(l, r),
    }
}

/// Element type inferred for an untemplated vector/matrix/array
/// constructor: the common type of the arguments' elements.
fn infer_element_type(args: &[Type]) -> Result<Type> {
    if args.is_empty() {
        return Ok(Type::F32);
    }
    let elems: Vec<Type> = args.iter().map(|a| a.element().clone()).collect();
    find_common_type(&elems)
}

/// Best-effort integer constant folding over literals, module constants
/// and `+ - *` (enough for array counts).
fn const_eval_int(expression: &Expression, scope: &Scope) -> Option<i64> {
    match expression {
        Expression::IntLiteral(text) => int_literal_value(text),
        Expression::Identifier(name) => match scope.lookup(name)? {
            ScopeEntry::GlobalConstant { value, .. } => *value,
            _ => None,
        },
        Expression::Paren(inner) => const_eval_int(inner, scope),
        Expression::Unary {
            operator: crate::ast::UnaryOperator::Negate,
            operand,
        } => Some(-const_eval_int(operand, scope)?),
        Expression::Binary { operator, lhs, rhs } => {
            let l = const_eval_int(lhs, scope)?;
            let r = const_eval_int(rhs, scope)?;
            use crate::ast::BinaryOperator::*;
            match operator {
                Add => Some(l + r),
                Sub => Some(l - r),
                Mul => Some(l * r),
                _ => None,
            }
        }
        _ => None,
    }
}

fn int_literal_value(text: &str) -> Option<i64> {
    let trimmed = text.trim_end_matches(|c| c == 'i' || c == 'u');
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16).ok()
    } else {
        trimmed.parse().ok()
    }
}

fn check_duplicate_names(tu: &TranslationUnit) -> Result<()> {
    let mut seen = HashSet::new();
    for decl in &tu.declarations {
        if let Some(name) = decl.name() {
            if !seen.insert(name.clone()) {
                return Err(Error::DuplicateModuleName(name.clone()));
            }
        }
    }
    Ok(())
}

/// Collects module-scope identifiers referenced from a declaration's type,
/// attributes, initializer, parameter list, return type or struct members.
/// Function bodies are deliberately excluded.
fn collect_declaration_names(decl: &GlobalDecl, names: &mut HashSet<SmolStr>) {
    fn walk(node: NodeRef<'_>, names: &mut HashSet<SmolStr>) {
        match node {
            NodeRef::Expression(Expression::Identifier(name)) => {
                names.insert(name.clone());
            }
            NodeRef::Expression(Expression::FunctionCall { callee, .. }) => {
                names.insert(callee.clone());
            }
            NodeRef::TypeDecl(ty) => {
                names.insert(ty.name.clone());
            }
            _ => {}
        }
        crate::ast::visit_children(&mut |child, state| walk(child, state), node, names);
    }

    match decl {
        GlobalDecl::Function(f) => {
            for attr in &f.attributes {
                walk(NodeRef::Attribute(attr), names);
            }
            for param in &f.parameters {
                for attr in &param.attributes {
                    walk(NodeRef::Attribute(attr), names);
                }
                walk(NodeRef::TypeDecl(&param.ty), names);
            }
            for attr in &f.return_attributes {
                walk(NodeRef::Attribute(attr), names);
            }
            if let Some(ret) = &f.return_type {
                walk(NodeRef::TypeDecl(ret), names);
            }
        }
        other => walk(NodeRef::GlobalDecl(other), names),
    }
}

/// Kahn's algorithm over declaration-name references, stable with respect
/// to source order. Only name-introducing declarations participate.
fn dependency_order(tu: &TranslationUnit) -> Result<Vec<usize>> {
    let mut name_to_index = HashMap::new();
    for (index, decl) in tu.declarations.iter().enumerate() {
        if let Some(name) = decl.name() {
            name_to_index.insert(name.clone(), index);
        }
    }

    let mut dependencies: HashMap<usize, HashSet<usize>> = HashMap::new();
    for (index, decl) in tu.declarations.iter().enumerate() {
        if decl.name().is_none() {
            continue;
        }
        let mut names = HashSet::new();
        collect_declaration_names(decl, &mut names);
        let deps: HashSet<usize> = names
            .iter()
            .filter_map(|n| name_to_index.get(n).copied())
            .filter(|dep| *dep != index)
            .collect();
        dependencies.insert(index, deps);
    }

    let mut ordered = Vec::new();
    let mut done: HashSet<usize> = HashSet::new();
    let mut remaining: Vec<usize> = (0..tu.declarations.len())
        .filter(|i| tu.declarations[*i].name().is_some())
        .collect();
    while !remaining.is_empty() {
        let mut progressed = false;
        let mut next_remaining = Vec::new();
        for index in remaining.drain(..) {
            let ready = dependencies[&index].iter().all(|dep| done.contains(dep));
            if ready {
                ordered.push(index);
                done.insert(index);
                progressed = true;
            } else {
                next_remaining.push(index);
            }
        }
        if !progressed {
            let index = next_remaining[0];
            let name = tu.declarations[index].name().cloned().unwrap_or_default();
            return Err(Error::CyclicModuleDeclaration(name));
        }
        remaining = next_remaining;
    }
    Ok(ordered)
}

/// Function names ordered callees-first, so the uniformity analyzer knows
/// every callee's tags before visiting a call site. WGSL forbids
/// recursion; if a cycle sneaks in, source order is kept as a fallback.
fn call_graph_order(tu: &TranslationUnit) -> Vec<SmolStr> {
    let mut functions: IndexMap<SmolStr, HashSet<SmolStr>> = IndexMap::new();
    for decl in &tu.declarations {
        if let GlobalDecl::Function(f) = &**decl {
            let mut names = HashSet::new();
            fn walk(node: NodeRef<'_>, names: &mut HashSet<SmolStr>) {
                match node {
                    NodeRef::Expression(Expression::FunctionCall { callee, .. }) => {
                        names.insert(callee.clone());
                    }
                    NodeRef::Statement(Statement::FunctionCall { callee, .. }) => {
                        names.insert(callee.clone());
                    }
                    _ => {}
                }
                crate::ast::visit_children(&mut |child, state| walk(child, state), node, names);
            }
            walk(NodeRef::Statement(&f.body), &mut names);
            functions.insert(f.name.clone(), names);
        }
    }

    let mut order = Vec::new();
    let mut done: HashSet<SmolStr> = HashSet::new();
    loop {
        let mut progressed = false;
        for (name, callees) in &functions {
            if done.contains(name) {
                continue;
            }
            let ready = callees
                .iter()
                .filter(|c| functions.contains_key(*c))
                .all(|c| done.contains(c));
            if ready {
                order.push(name.clone());
                done.insert(name.clone());
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    for name in functions.keys() {
        if !done.contains(name) {
            order.push(name.clone());
        }
    }
    order
}
