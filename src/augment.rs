//! Metamorphic fragment generation.
//!
//! The forward half of the toolkit: wraps expressions in identity
//! operations, obfuscates known constants against the shader job's known
//! uniform values, injects dead code, and wraps statements in control flow
//! that always runs them exactly once. Every marker carries enough
//! information for the reducer to reverse it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smol_str::SmolStr;
use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{
    AugmentedExpression, BinaryOperator, Compound, Expression, FunctionDecl, GlobalDecl,
    Statement, TemplateArg, TranslationUnit, TypeDecl, UnaryOperator,
};
use crate::behaviour::{statement_behaviours, Behaviours};
use crate::resolver::{NodeKey, ResolvedEnvironment};
use crate::rewrite::Rewriter;
use crate::types::Type;

/// A shader paired with the uniform values the harness will bind, which is
/// what makes "known value" and "false by construction" decidable.
#[derive(Clone)]
pub struct ShaderJob {
    pub tu: Rc<TranslationUnit>,
    pub uniforms: UniformSnapshot,
}

#[derive(Clone, Debug, Default)]
pub struct UniformSnapshot {
    pub scalars: Vec<UniformScalar>,
}

/// One scalar the harness knows the runtime value of: `variable` or
/// `variable.member`.
#[derive(Clone, Debug)]
pub struct UniformScalar {
    pub variable: SmolStr,
    pub member: Option<SmolStr>,
    pub value: i64,
}

impl UniformScalar {
    fn expression(&self) -> Rc<Expression> {
        let base = Rc::new(Expression::Identifier(self.variable.clone()));
        match &self.member {
            Some(member) => Rc::new(Expression::Member {
                base,
                member: member.clone(),
            }),
            None => base,
        }
    }
}

/// The randomness and shaping knobs of the generators. The five weights
/// select between: literal, `B op arbitrary`, `arbitrary op B`, double
/// negation, uniform-derived comparison.
pub trait FuzzerSettings {
    fn random_int(&mut self, limit: usize) -> usize;
    fn random_bool(&mut self) -> bool;
    fn random_index(&mut self, len: usize) -> usize {
        self.random_int(len)
    }
    fn max_depth(&self) -> u32;
    fn false_by_construction_weights(&self, depth: u32) -> [u32; 5];
    fn true_by_construction_weights(&self, depth: u32) -> [u32; 5];
}

pub fn random_element<'a, T>(settings: &mut dyn FuzzerSettings, items: &'a [T]) -> &'a T {
    &items[settings.random_index(items.len())]
}

/// Seedable default settings backed by [`StdRng`].
pub struct StdFuzzerSettings {
    rng: StdRng,
    max_depth: u32,
}

impl StdFuzzerSettings {
    pub fn new(seed: u64) -> StdFuzzerSettings {
        StdFuzzerSettings {
            rng: StdRng::seed_from_u64(seed),
            max_depth: 4,
        }
    }

    pub fn with_max_depth(seed: u64, max_depth: u32) -> StdFuzzerSettings {
        StdFuzzerSettings {
            rng: StdRng::seed_from_u64(seed),
            max_depth,
        }
    }
}

impl FuzzerSettings for StdFuzzerSettings {
    fn random_int(&mut self, limit: usize) -> usize {
        if limit == 0 {
            0
        } else {
            self.rng.gen_range(0..limit)
        }
    }

    fn random_bool(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }

    fn max_depth(&self) -> u32 {
        self.max_depth
    }

    fn false_by_construction_weights(&self, depth: u32) -> [u32; 5] {
        if depth + 1 >= self.max_depth {
            [2, 0, 0, 0, 3]
        } else {
            [2, 2, 2, 2, 3]
        }
    }

    fn true_by_construction_weights(&self, depth: u32) -> [u32; 5] {
        self.false_by_construction_weights(depth)
    }
}

fn weighted_choice(settings: &mut dyn FuzzerSettings, weights: &[u32; 5]) -> usize {
    let total: u32 = weights.iter().sum();
    if total == 0 {
        return 0;
    }
    let mut pick = settings.random_int(total as usize) as u32;
    for (index, weight) in weights.iter().enumerate() {
        if pick < *weight {
            return index;
        }
        pick -= weight;
    }
    0
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Typed constants
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A literal (or constructor of literals) of type `ty` that evaluates to
/// `value` in every invocation. `None` when the type has no such spelling
/// (pointers, textures, atomics).
pub fn constant_with_value(value: i64, ty: &Type) -> Option<Rc<Expression>> {
    let expr = match ty {
        Type::Bool => Rc::new(Expression::BoolLiteral(value != 0)),
        Type::I32 => int_literal(value, "i"),
        Type::U32 => int_literal(value, "u"),
        Type::AbstractInt => int_literal(value, ""),
        Type::F32 => float_literal(value, "f"),
        Type::F16 => float_literal(value, "h"),
        Type::AbstractFloat => float_literal(value, ""),
        Type::Vector { size, elem } => {
            let decl = type_decl_of(ty)?;
            let arguments = (0..*size)
                .map(|_| constant_with_value(value, elem))
                .collect::<Option<Vec<_>>>()?;
            Rc::new(Expression::TypeConstructor {
                ty: decl,
                arguments,
            })
        }
        Type::Matrix {
            columns,
            rows,
            elem,
        } => {
            let decl = type_decl_of(ty)?;
            let arguments = (0..(*columns as usize * *rows as usize))
                .map(|_| constant_with_value(value, elem))
                .collect::<Option<Vec<_>>>()?;
            Rc::new(Expression::TypeConstructor {
                ty: decl,
                arguments,
            })
        }
        Type::Array {
            elem,
            count: Some(count),
        } => {
            let decl = type_decl_of(ty)?;
            let arguments = (0..*count)
                .map(|_| constant_with_value(value, elem))
                .collect::<Option<Vec<_>>>()?;
            Rc::new(Expression::TypeConstructor {
                ty: decl,
                arguments,
            })
        }
        Type::Struct(s) => {
            let arguments = s
                .members
                .iter()
                .map(|m| constant_with_value(value, &m.ty))
                .collect::<Option<Vec<_>>>()?;
            Rc::new(Expression::FunctionCall {
                callee: s.name.clone(),
                template: None,
                arguments,
            })
        }
        _ => return None,
    };
    Some(expr)
}

fn int_literal(value: i64, suffix: &str) -> Rc<Expression> {
    if value < 0 {
        let magnitude = Rc::new(Expression::IntLiteral(
            format!("{}{}", value.unsigned_abs(), suffix).into(),
        ));
        Rc::new(Expression::Unary {
            operator: UnaryOperator::Negate,
            operand: magnitude,
        })
    } else {
        Rc::new(Expression::IntLiteral(format!("{}{}", value, suffix).into()))
    }
}

fn float_literal(value: i64, suffix: &str) -> Rc<Expression> {
    if value < 0 {
        let magnitude = Rc::new(Expression::FloatLiteral(
            format!("{}.0{}", value.unsigned_abs(), suffix).into(),
        ));
        Rc::new(Expression::Unary {
            operator: UnaryOperator::Negate,
            operand: magnitude,
        })
    } else {
        Rc::new(Expression::FloatLiteral(format!("{}.0{}", value, suffix).into()))
    }
}

/// A syntactic spelling of a resolved type, for constructor heads.
fn type_decl_of(ty: &Type) -> Option<Rc<TypeDecl>> {
    let decl = match ty {
        Type::Bool => TypeDecl::plain("bool"),
        Type::I32 => TypeDecl::plain("i32"),
        Type::U32 => TypeDecl::plain("u32"),
        Type::F32 => TypeDecl::plain("f32"),
        Type::F16 => TypeDecl::plain("f16"),
        Type::Vector { size, elem } => TypeDecl {
            name: format!("vec{}", size).into(),
            template: vec![TemplateArg::Type(type_decl_of(elem)?)],
        },
        Type::Matrix {
            columns,
            rows,
            elem,
        } => TypeDecl {
            name: format!("mat{}x{}", columns, rows).into(),
            template: vec![TemplateArg::Type(type_decl_of(elem)?)],
        },
        Type::Array {
            elem,
            count: Some(count),
        } => TypeDecl {
            name: "array".into(),
            template: vec![
                TemplateArg::Type(type_decl_of(elem)?),
                TemplateArg::Expression(Rc::new(Expression::IntLiteral(
                    format!("{}", count).into(),
                ))),
            ],
        },
        Type::Struct(s) => TypeDecl::plain(s.name.clone()),
        _ => return None,
    };
    Some(Rc::new(decl))
}

/// Structural copy with no `Rc` sharing, so a duplicated operand can be
/// typed independently of the original.
fn deep_clone(expression: &Rc<Expression>) -> Rc<Expression> {
    let cloned = match &**expression {
        Expression::BoolLiteral(_)
        | Expression::IntLiteral(_)
        | Expression::Identifier(_)
        | Expression::FloatLiteral(_) => (**expression).clone(),
        Expression::Paren(inner) => Expression::Paren(deep_clone(inner)),
        Expression::Unary { operator, operand } => Expression::Unary {
            operator: *operator,
            operand: deep_clone(operand),
        },
        Expression::Binary { operator, lhs, rhs } => Expression::Binary {
            operator: *operator,
            lhs: deep_clone(lhs),
            rhs: deep_clone(rhs),
        },
        Expression::FunctionCall {
            callee,
            template,
            arguments,
        } => Expression::FunctionCall {
            callee: callee.clone(),
            template: template.clone(),
            arguments: arguments.iter().map(deep_clone).collect(),
        },
        Expression::TypeConstructor { ty, arguments } => Expression::TypeConstructor {
            ty: ty.clone(),
            arguments: arguments.iter().map(deep_clone).collect(),
        },
        Expression::Member { base, member } => Expression::Member {
            base: deep_clone(base),
            member: member.clone(),
        },
        Expression::Index { base, index } => Expression::Index {
            base: deep_clone(base),
            index: deep_clone(index),
        },
        Expression::Augmented(augmented) => Expression::Augmented(match augmented {
            AugmentedExpression::AddZero {
                original,
                zero,
                zero_first,
            } => AugmentedExpression::AddZero {
                original: deep_clone(original),
                zero: deep_clone(zero),
                zero_first: *zero_first,
            },
            AugmentedExpression::SubZero { original, zero } => AugmentedExpression::SubZero {
                original: deep_clone(original),
                zero: deep_clone(zero),
            },
            AugmentedExpression::MulOne {
                original,
                one,
                one_first,
            } => AugmentedExpression::MulOne {
                original: deep_clone(original),
                one: deep_clone(one),
                one_first: *one_first,
            },
            AugmentedExpression::DivOne { original, one } => AugmentedExpression::DivOne {
                original: deep_clone(original),
                one: deep_clone(one),
            },
            AugmentedExpression::KnownValue { expression, value } => {
                AugmentedExpression::KnownValue {
                    expression: deep_clone(expression),
                    value: deep_clone(value),
                }
            }
            AugmentedExpression::IdentityOperation {
                original,
                replacement,
            } => AugmentedExpression::IdentityOperation {
                original: deep_clone(original),
                replacement: deep_clone(replacement),
            },
            AugmentedExpression::FalseByConstruction(inner) => {
                AugmentedExpression::FalseByConstruction(deep_clone(inner))
            }
            AugmentedExpression::TrueByConstruction(inner) => {
                AugmentedExpression::TrueByConstruction(deep_clone(inner))
            }
            AugmentedExpression::ArbitraryExpression(inner) => {
                AugmentedExpression::ArbitraryExpression(deep_clone(inner))
            }
        }),
    };
    Rc::new(cloned)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Generator
////////////////////////////////////////////////////////////////////////////////////////////////////

pub struct MetamorphicGenerator<'a> {
    settings: &'a mut dyn FuzzerSettings,
    uniforms: &'a UniformSnapshot,
    next_wrapper_id: u32,
    next_fresh_name: u32,
}

impl<'a> MetamorphicGenerator<'a> {
    pub fn new(
        settings: &'a mut dyn FuzzerSettings,
        uniforms: &'a UniformSnapshot,
    ) -> MetamorphicGenerator<'a> {
        MetamorphicGenerator {
            settings,
            uniforms,
            next_wrapper_id: 0,
            next_fresh_name: 0,
        }
    }

    pub fn false_by_construction(&mut self) -> Rc<Expression> {
        let inner = self.bool_by_construction(false, 0);
        Rc::new(Expression::Augmented(
            AugmentedExpression::FalseByConstruction(inner),
        ))
    }

    pub fn true_by_construction(&mut self) -> Rc<Expression> {
        let inner = self.bool_by_construction(true, 0);
        Rc::new(Expression::Augmented(
            AugmentedExpression::TrueByConstruction(inner),
        ))
    }

    /// Weighted recursive construction: a literal; `B && arbitrary` /
    /// `arbitrary && B` (or `||` for true); `!(not-B)`; a uniform-derived
    /// comparison with the wanted truth value.
    fn bool_by_construction(&mut self, wanted: bool, depth: u32) -> Rc<Expression> {
        if depth >= self.settings.max_depth() {
            return self.leaf_bool(wanted);
        }
        let weights = if wanted {
            self.settings.true_by_construction_weights(depth)
        } else {
            self.settings.false_by_construction_weights(depth)
        };
        let operator = if wanted {
            BinaryOperator::ShortCircuitOr
        } else {
            BinaryOperator::ShortCircuitAnd
        };
        match weighted_choice(self.settings, &weights) {
            0 => Rc::new(Expression::BoolLiteral(wanted)),
            1 => {
                let lhs = self.bool_by_construction(wanted, depth + 1);
                let rhs = self.arbitrary_bool(depth + 1);
                Rc::new(Expression::Paren(Rc::new(Expression::Binary {
                    operator,
                    lhs,
                    rhs,
                })))
            }
            2 => {
                // The constructed side still decides the value, it just
                // sits on the right.
                let lhs = self.arbitrary_bool(depth + 1);
                let rhs = self.bool_by_construction(wanted, depth + 1);
                let combining = if wanted {
                    BinaryOperator::ShortCircuitOr
                } else {
                    BinaryOperator::ShortCircuitAnd
                };
                // `arbitrary || T` is only `true`-preserving if arbitrary
                // has no side effects, which generated booleans don't.
                Rc::new(Expression::Paren(Rc::new(Expression::Binary {
                    operator: combining,
                    lhs,
                    rhs,
                })))
            }
            3 => {
                let negated = self.bool_by_construction(!wanted, depth + 1);
                Rc::new(Expression::Unary {
                    operator: UnaryOperator::Not,
                    operand: Rc::new(Expression::Paren(negated)),
                })
            }
            _ => self.leaf_bool(wanted),
        }
    }

    fn leaf_bool(&mut self, wanted: bool) -> Rc<Expression> {
        match self.uniform_comparison(Some(wanted)) {
            Some(expr) => expr,
            None => Rc::new(Expression::BoolLiteral(wanted)),
        }
    }

    fn arbitrary_bool(&mut self, depth: u32) -> Rc<Expression> {
        if depth < self.settings.max_depth() && self.settings.random_bool() {
            if let Some(expr) = self.uniform_comparison(None) {
                return expr;
            }
        }
        Rc::new(Expression::BoolLiteral(self.settings.random_bool()))
    }

    /// A comparison against a known uniform scalar. With `wanted` set the
    /// outcome is fixed by choosing the constant side appropriately;
    /// without it the outcome is arbitrary.
    fn uniform_comparison(&mut self, wanted: Option<bool>) -> Option<Rc<Expression>> {
        if self.uniforms.scalars.is_empty() {
            return None;
        }
        let scalar =
            &self.uniforms.scalars[self.settings.random_index(self.uniforms.scalars.len())];
        let value = scalar.value;
        let (operator, constant) = match wanted {
            None => {
                let ops = [
                    BinaryOperator::LessThan,
                    BinaryOperator::GreaterThan,
                    BinaryOperator::Equal,
                    BinaryOperator::NotEqual,
                ];
                (
                    *random_element(self.settings, &ops),
                    value + self.settings.random_int(7) as i64 - 3,
                )
            }
            Some(true) => match self.settings.random_int(4) {
                0 => (BinaryOperator::Equal, value),
                1 => (BinaryOperator::LessEqual, value),
                2 => (BinaryOperator::LessThan, value + 1),
                _ => (BinaryOperator::GreaterThan, value - 1),
            },
            Some(false) => match self.settings.random_int(3) {
                0 => (BinaryOperator::NotEqual, value),
                1 => (BinaryOperator::GreaterThan, value),
                _ => (BinaryOperator::LessThan, value),
            },
        };
        Some(Rc::new(Expression::Paren(Rc::new(Expression::Binary {
            operator,
            lhs: scalar.expression(),
            rhs: int_literal(constant, ""),
        }))))
    }

    /// Wraps a numeric expression in one of the reversible identity
    /// forms.
    pub fn identity_operation(
        &mut self,
        expression: &Rc<Expression>,
        ty: &Type,
    ) -> Option<Rc<Expression>> {
        if !ty.is_numeric() || matches!(ty, Type::Matrix { .. }) {
            return None;
        }
        let augmented = match self.settings.random_int(5) {
            0 => AugmentedExpression::AddZero {
                original: expression.clone(),
                zero: constant_with_value(0, ty)?,
                zero_first: self.settings.random_bool(),
            },
            1 => AugmentedExpression::SubZero {
                original: expression.clone(),
                zero: constant_with_value(0, ty)?,
            },
            2 => AugmentedExpression::MulOne {
                original: expression.clone(),
                one: constant_with_value(1, ty)?,
                one_first: self.settings.random_bool(),
            },
            3 => AugmentedExpression::DivOne {
                original: expression.clone(),
                one: constant_with_value(1, ty)?,
            },
            _ => {
                let callee = if self.settings.random_bool() {
                    "max"
                } else {
                    "min"
                };
                let replacement = Rc::new(Expression::FunctionCall {
                    callee: callee.into(),
                    template: None,
                    arguments: vec![expression.clone(), deep_clone(expression)],
                });
                AugmentedExpression::IdentityOperation {
                    original: expression.clone(),
                    replacement,
                }
            }
        };
        Some(Rc::new(Expression::Augmented(augmented)))
    }

    /// Obfuscates an integer constant as a uniform-derived computation
    /// with the same value.
    pub fn known_value(&mut self, literal: &Rc<Expression>, value: i64) -> Option<Rc<Expression>> {
        if self.uniforms.scalars.is_empty() {
            return None;
        }
        let scalar =
            &self.uniforms.scalars[self.settings.random_index(self.uniforms.scalars.len())];
        // value == (value - known) + uniform, for the harness's bindings.
        let delta = value - scalar.value;
        let expression = Rc::new(Expression::Paren(Rc::new(Expression::Binary {
            operator: BinaryOperator::Add,
            lhs: int_literal(delta, ""),
            rhs: scalar.expression(),
        })));
        Some(Rc::new(Expression::Augmented(
            AugmentedExpression::KnownValue {
                expression,
                value: literal.clone(),
            },
        )))
    }

    /// `if (<false-by-construction>) { ... }`, marked as removable.
    pub fn dead_code_fragment(&mut self) -> Rc<Statement> {
        let condition = self.false_by_construction();
        let name: SmolStr = format!("dead_var_{}", self.next_fresh_name).into();
        self.next_fresh_name += 1;
        let body = vec![Rc::new(Statement::Variable {
            name,
            ty: Some(Rc::new(TypeDecl::plain("i32"))),
            initializer: Some(int_literal(self.settings.random_int(100) as i64, "i")),
        })];
        let inner = Rc::new(Statement::If {
            condition,
            then_branch: Rc::new(Statement::Compound(Compound::new(body))),
            else_branch: None,
        });
        Rc::new(Statement::DeadCodeFragment { body: inner })
    }

    /// Wraps statements in `if (<true-by-construction>) { ... }` tagged
    /// with a fresh wrapper id. When the wrapped statements return a value
    /// on every path, the dead else branch carries a synthesized return so
    /// the function still returns on all static paths.
    pub fn wrap_in_conditional(
        &mut self,
        statements: Vec<Rc<Statement>>,
        synthetic_return: Option<Rc<Statement>>,
    ) -> Rc<Statement> {
        let id = self.fresh_wrapper_id();
        let condition = self.true_by_construction();
        let then_branch = Rc::new(Statement::Compound(Compound::tagged(statements, id)));
        let else_branch = synthetic_return.map(|ret| {
            let marker = Rc::new(Statement::ControlFlowWrapReturn { id, body: ret });
            Rc::new(Statement::Compound(Compound::new(vec![marker])))
        });
        let inner = Rc::new(Statement::If {
            condition,
            then_branch,
            else_branch,
        });
        Rc::new(Statement::ControlFlowWrapper { id, body: inner })
    }

    /// Wraps statements in a single-trip `loop { ...; break; }`.
    pub fn wrap_in_loop(&mut self, statements: Vec<Rc<Statement>>) -> Rc<Statement> {
        let id = self.fresh_wrapper_id();
        let tagged = Rc::new(Statement::Compound(Compound::tagged(statements, id)));
        let helper = Rc::new(Statement::ControlFlowWrapHelperStatement {
            id,
            body: Rc::new(Statement::Break),
        });
        let inner = Rc::new(Statement::Loop {
            body: vec![tagged, helper],
            continuing: None,
        });
        Rc::new(Statement::ControlFlowWrapper { id, body: inner })
    }

    fn fresh_wrapper_id(&mut self) -> u32 {
        let id = self.next_wrapper_id;
        self.next_wrapper_id += 1;
        id
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Whole-tree injection drivers
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Wraps roughly one in `1/chance` numeric expressions in an identity
/// operation.
pub fn inject_identity_operations(
    job: &ShaderJob,
    env: &ResolvedEnvironment,
    settings: &mut dyn FuzzerSettings,
) -> ShaderJob {
    let mut generator = MetamorphicGenerator::new(settings, &job.uniforms);
    let mut done: HashSet<NodeKey> = HashSet::new();
    let mut callback = |expression: &Rc<Expression>| -> Option<Rc<Expression>> {
        let key = NodeKey::of_expression(expression);
        if done.contains(&key) {
            return None;
        }
        if matches!(&**expression, Expression::Augmented(_)) {
            return None;
        }
        let ty = env.type_of(expression)?.clone();
        if generator.settings.random_int(4) != 0 {
            return None;
        }
        done.insert(key);
        generator.identity_operation(expression, &ty)
    };
    let mut rewriter = Rewriter {
        expression: Some(&mut callback),
        ..Rewriter::default()
    };
    ShaderJob {
        tu: Rc::new(rewriter.rewrite_unit(&job.tu)),
        uniforms: job.uniforms.clone(),
    }
}

/// Replaces roughly half of the plain integer literals with
/// uniform-derived computations of the same value.
pub fn obfuscate_known_values(job: &ShaderJob, settings: &mut dyn FuzzerSettings) -> ShaderJob {
    let mut generator = MetamorphicGenerator::new(settings, &job.uniforms);
    let mut done: HashSet<NodeKey> = HashSet::new();
    let mut callback = |expression: &Rc<Expression>| -> Option<Rc<Expression>> {
        let key = NodeKey::of_expression(expression);
        if done.contains(&key) {
            return None;
        }
        let text = match &**expression {
            Expression::IntLiteral(text) => text,
            _ => return None,
        };
        if !matches!(expression.literal_suffix(), None | Some('i')) {
            return None;
        }
        let value: i64 = match text.trim_end_matches('i').parse() {
            Ok(v) => v,
            Err(_) => return None,
        };
        if generator.settings.random_int(2) != 0 {
            return None;
        }
        done.insert(key);
        generator.known_value(expression, value)
    };
    let mut rewriter = Rewriter {
        expression: Some(&mut callback),
        ..Rewriter::default()
    };
    ShaderJob {
        tu: Rc::new(rewriter.rewrite_unit(&job.tu)),
        uniforms: job.uniforms.clone(),
    }
}

/// Inserts dead-code fragments into the statement lists of every function
/// body, roughly one per three insertion points.
pub fn inject_dead_code(job: &ShaderJob, settings: &mut dyn FuzzerSettings) -> ShaderJob {
    let mut generator = MetamorphicGenerator::new(settings, &job.uniforms);
    let declarations = job
        .tu
        .declarations
        .iter()
        .map(|decl| match &**decl {
            GlobalDecl::Function(function) => {
                let body = insert_dead_code_in_statement(&mut generator, &function.body);
                Rc::new(GlobalDecl::Function(Rc::new(FunctionDecl {
                    attributes: function.attributes.clone(),
                    name: function.name.clone(),
                    parameters: function.parameters.clone(),
                    return_attributes: function.return_attributes.clone(),
                    return_type: function.return_type.clone(),
                    body,
                })))
            }
            _ => decl.clone(),
        })
        .collect();
    ShaderJob {
        tu: Rc::new(TranslationUnit {
            directives: job.tu.directives.clone(),
            declarations,
        }),
        uniforms: job.uniforms.clone(),
    }
}

fn insert_dead_code_in_list(
    generator: &mut MetamorphicGenerator<'_>,
    statements: &[Rc<Statement>],
) -> Vec<Rc<Statement>> {
    let mut out = Vec::with_capacity(statements.len() + 1);
    for statement in statements {
        if generator.settings.random_int(3) == 0 {
            out.push(generator.dead_code_fragment());
        }
        out.push(insert_dead_code_in_statement(generator, statement));
    }
    if generator.settings.random_int(3) == 0 {
        out.push(generator.dead_code_fragment());
    }
    out
}

fn insert_dead_code_in_statement(
    generator: &mut MetamorphicGenerator<'_>,
    statement: &Rc<Statement>,
) -> Rc<Statement> {
    match &**statement {
        Statement::Compound(compound) => Rc::new(Statement::Compound(Compound {
            statements: insert_dead_code_in_list(generator, &compound.statements),
            metadata: compound.metadata.clone(),
        })),
        Statement::If {
            condition,
            then_branch,
            else_branch,
        } => Rc::new(Statement::If {
            condition: condition.clone(),
            then_branch: insert_dead_code_in_statement(generator, then_branch),
            else_branch: else_branch
                .as_ref()
                .map(|s| insert_dead_code_in_statement(generator, s)),
        }),
        Statement::While { condition, body } => Rc::new(Statement::While {
            condition: condition.clone(),
            body: insert_dead_code_in_statement(generator, body),
        }),
        Statement::For {
            initializer,
            condition,
            update,
            body,
        } => Rc::new(Statement::For {
            initializer: initializer.clone(),
            condition: condition.clone(),
            update: update.clone(),
            body: insert_dead_code_in_statement(generator, body),
        }),
        Statement::Loop { body, continuing } => Rc::new(Statement::Loop {
            body: insert_dead_code_in_list(generator, body),
            continuing: continuing.clone(),
        }),
        _ => statement.clone(),
    }
}

/// Wraps statements (those whose behaviour allows it) in always-taken
/// control flow. `return_constant` builds the synthesized return for
/// functions that must still return on every static path.
pub fn wrap_control_flow(
    job: &ShaderJob,
    env: &ResolvedEnvironment,
    settings: &mut dyn FuzzerSettings,
) -> ShaderJob {
    let mut generator = MetamorphicGenerator::new(settings, &job.uniforms);
    let declarations = job
        .tu
        .declarations
        .iter()
        .map(|decl| match &**decl {
            GlobalDecl::Function(function) => {
                let return_type = env
                    .function_type(&function.name)
                    .and_then(|ft| ft.return_type.clone());
                let body = wrap_in_statement(&mut generator, &function.body, return_type.as_ref());
                Rc::new(GlobalDecl::Function(Rc::new(FunctionDecl {
                    attributes: function.attributes.clone(),
                    name: function.name.clone(),
                    parameters: function.parameters.clone(),
                    return_attributes: function.return_attributes.clone(),
                    return_type: function.return_type.clone(),
                    body,
                })))
            }
            _ => decl.clone(),
        })
        .collect();
    ShaderJob {
        tu: Rc::new(TranslationUnit {
            directives: job.tu.directives.clone(),
            declarations,
        }),
        uniforms: job.uniforms.clone(),
    }
}

fn wrap_in_list(
    generator: &mut MetamorphicGenerator<'_>,
    statements: &[Rc<Statement>],
    return_type: Option<&Type>,
) -> Vec<Rc<Statement>> {
    statements
        .iter()
        .map(|s| wrap_in_statement(generator, s, return_type))
        .collect()
}

fn wrap_in_statement(
    generator: &mut MetamorphicGenerator<'_>,
    statement: &Rc<Statement>,
    return_type: Option<&Type>,
) -> Rc<Statement> {
    let rebuilt: Rc<Statement> = match &**statement {
        Statement::Compound(compound) => Rc::new(Statement::Compound(Compound {
            statements: wrap_in_list(generator, &compound.statements, return_type),
            metadata: compound.metadata.clone(),
        })),
        Statement::If {
            condition,
            then_branch,
            else_branch,
        } => Rc::new(Statement::If {
            condition: condition.clone(),
            then_branch: wrap_in_statement(generator, then_branch, return_type),
            else_branch: else_branch
                .as_ref()
                .map(|s| wrap_in_statement(generator, s, return_type)),
        }),
        _ => statement.clone(),
    };

    if matches!(
        &*rebuilt,
        Statement::Compound(_)
            | Statement::DeadCodeFragment { .. }
            | Statement::ControlFlowWrapper { .. }
            | Statement::ControlFlowWrapReturn { .. }
            | Statement::ControlFlowWrapHelperStatement { .. }
    ) {
        return rebuilt;
    }
    if generator.settings.random_int(3) != 0 {
        return rebuilt;
    }

    let behaviours = statement_behaviours(&rebuilt);
    let simple = !behaviours.contains(Behaviours::BREAK) && !behaviours.contains(Behaviours::CONTINUE);
    if !simple {
        return rebuilt;
    }
    if behaviours.contains(Behaviours::RETURN) {
        let synthetic = return_type
            .and_then(|ty| constant_with_value(1, ty))
            .map(|expr| {
                Rc::new(Statement::Return {
                    expression: Some(expr),
                })
            });
        match synthetic {
            Some(ret) => generator.wrap_in_conditional(vec![rebuilt], Some(ret)),
            None => rebuilt,
        }
    } else if generator.settings.random_bool() {
        generator.wrap_in_conditional(vec![rebuilt], None)
    } else {
        generator.wrap_in_loop(vec![rebuilt])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::print::print;
    use crate::resolver::resolve;

    fn job(src: &str) -> ShaderJob {
        ShaderJob {
            tu: Rc::new(parse(src).unwrap()),
            uniforms: UniformSnapshot {
                scalars: vec![UniformScalar {
                    variable: "u_input".into(),
                    member: None,
                    value: 7,
                }],
            },
        }
    }

    const SRC: &str = "@group(0) @binding(0) var<uniform> u_input : i32;\n\
                       fn f(x : i32) -> i32 { var a : i32 = x; a = a + 2; return a; }\n";

    #[test]
    fn typed_constants() {
        assert_eq!(
            print_expr(&constant_with_value(1, &Type::U32).unwrap()),
            "1u"
        );
        assert_eq!(
            print_expr(&constant_with_value(0, &Type::vector(3, Type::F32)).unwrap()),
            "vec3<f32>(0.0f, 0.0f, 0.0f)"
        );
        assert_eq!(
            print_expr(&constant_with_value(-2, &Type::I32).unwrap()),
            "-2i"
        );
        assert!(constant_with_value(1, &Type::Sampler).is_none());
    }

    fn print_expr(e: &Rc<Expression>) -> String {
        let tu = TranslationUnit {
            directives: vec![],
            declarations: vec![Rc::new(GlobalDecl::Constant {
                name: "c".into(),
                ty: None,
                initializer: e.clone(),
            })],
        };
        let text = print(&tu);
        text.trim_start_matches("const c = ")
            .trim_end_matches(";\n")
            .to_string()
    }

    #[test]
    fn injected_trees_still_resolve() {
        let job = job(SRC);
        let env = resolve(&job.tu).unwrap();
        let mut settings = StdFuzzerSettings::new(42);

        let with_ids = inject_identity_operations(&job, &env, &mut settings);
        resolve(&with_ids.tu).expect("identity-augmented tree resolves");

        let with_known = obfuscate_known_values(&with_ids, &mut settings);
        resolve(&with_known.tu).expect("known-value tree resolves");

        let with_dead = inject_dead_code(&with_known, &mut settings);
        resolve(&with_dead.tu).expect("dead-code tree resolves");

        let env2 = resolve(&with_dead.tu).unwrap();
        let wrapped = wrap_control_flow(&with_dead, &env2, &mut settings);
        resolve(&wrapped.tu).expect("wrapped tree resolves");

        // And the printed form still parses.
        let printed = print(&wrapped.tu);
        parse(&printed).expect("printed augmented program parses");
    }

    #[test]
    fn by_construction_booleans_have_marker_roots() {
        let mut settings = StdFuzzerSettings::new(7);
        let uniforms = job(SRC).uniforms;
        let mut generator = MetamorphicGenerator::new(&mut settings, &uniforms);
        for _ in 0..16 {
            let f = generator.false_by_construction();
            assert!(matches!(
                &*f,
                Expression::Augmented(AugmentedExpression::FalseByConstruction(_))
            ));
            let t = generator.true_by_construction();
            assert!(matches!(
                &*t,
                Expression::Augmented(AugmentedExpression::TrueByConstruction(_))
            ));
        }
    }
}
