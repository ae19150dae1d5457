//! Resolver integration tests: the seed scenarios S1/S2, concretization,
//! dependency ordering, and totality of the recorded environment.

use std::rc::Rc;

use wyvern::ast::{
    visit_children, Expression, FunctionDecl, GlobalDecl, NodeRef, Statement, TranslationUnit,
    UnaryOperator,
};
use wyvern::resolver::{resolve, ResolvedEnvironment, ScopeEntry};
use wyvern::types::{AccessMode, AddressSpace, Type};
use wyvern::{parse, Error};

fn parse_ok(src: &str) -> TranslationUnit {
    parse(src).expect("source parses")
}

fn function<'a>(tu: &'a TranslationUnit, name: &str) -> &'a Rc<FunctionDecl> {
    tu.declarations
        .iter()
        .find_map(|d| match &**d {
            GlobalDecl::Function(f) if f.name == name => Some(f),
            _ => None,
        })
        .expect("function present")
}

fn body_statements<'a>(f: &'a FunctionDecl) -> &'a [Rc<Statement>] {
    match &*f.body {
        Statement::Compound(c) => &c.statements,
        other => panic!("function body is not a compound: {:?}", other),
    }
}

#[test]
fn s1_while_loop_types() -> anyhow::Result<()> {
    let tu = parse("fn f() -> i32 { var i : i32; while (i < 4) { i = i + 1; } return i; }")?;
    let env = resolve(&tu)?;
    let f = function(&tu, "f");
    let stmts = body_statements(f);

    let condition = match &*stmts[1] {
        Statement::While { condition, .. } => condition.clone(),
        other => panic!("expected while, got {:?}", other),
    };
    assert_eq!(env.type_of(&condition), Some(&Type::Bool));

    let (lhs, rhs) = match &*condition {
        Expression::Paren(inner) => match &**inner {
            Expression::Binary { lhs, rhs, .. } => (lhs.clone(), rhs.clone()),
            other => panic!("expected comparison, got {:?}", other),
        },
        other => panic!("expected parenthesized condition, got {:?}", other),
    };
    assert_eq!(env.type_of(&lhs), Some(&Type::I32));
    assert_eq!(env.type_of(&rhs), Some(&Type::AbstractInt));

    let signature = env.function_type("f").unwrap();
    assert!(signature.parameters.is_empty());
    assert_eq!(signature.return_type, Some(Type::I32));
    Ok(())
}

#[test]
fn s2_atomic_pointer_types() -> anyhow::Result<()> {
    let tu = parse(
        "@group(0) @binding(0) var<storage, read_write> s : i32;\n\
         var<workgroup> g1 : atomic<i32>;\n\
         fn f() { let x = atomicLoad(&g1); }\n",
    )?;
    let env = resolve(&tu)?;
    let f = function(&tu, "f");
    let stmts = body_statements(f);

    let init = match &*stmts[0] {
        Statement::ValueDecl { initializer, .. } => initializer.clone(),
        other => panic!("expected let, got {:?}", other),
    };
    assert_eq!(env.type_of(&init), Some(&Type::I32));

    let pointer = match &*init {
        Expression::FunctionCall { arguments, .. } => arguments[0].clone(),
        other => panic!("expected call, got {:?}", other),
    };
    assert!(matches!(
        &*pointer,
        Expression::Unary {
            operator: UnaryOperator::AddressOf,
            ..
        }
    ));
    assert_eq!(
        env.type_of(&pointer),
        Some(&Type::pointer(
            AddressSpace::Workgroup,
            Type::Atomic {
                elem: Box::new(Type::I32)
            },
            AccessMode::ReadWrite,
        ))
    );
    Ok(())
}

#[test]
fn abstract_literals_concretize_in_declarations() {
    let tu = parse_ok("fn f() { let x = 1; let y = 1.0; return; }");
    let env = resolve(&tu).unwrap();
    let f = function(&tu, "f");
    let stmts = body_statements(f);

    let scope = env.scope_before(&stmts[2]).unwrap();
    match scope.lookup("x") {
        Some(ScopeEntry::LocalValue { ty, .. }) => assert_eq!(ty, &Type::I32),
        other => panic!("unexpected entry {:?}", other),
    }
    match scope.lookup("y") {
        Some(ScopeEntry::LocalValue { ty, .. }) => assert_eq!(ty, &Type::F32),
        other => panic!("unexpected entry {:?}", other),
    }
}

#[test]
fn out_of_order_declarations_resolve() {
    let tu = parse_ok(
        "struct S { m : T, }\n\
         alias T = i32;\n\
         fn f(v : S) -> i32 { return v.m; }\n",
    );
    let env = resolve(&tu).unwrap();
    let f = function(&tu, "f");
    let stmts = body_statements(f);
    let ret = match &*stmts[0] {
        Statement::Return {
            expression: Some(e),
        } => e.clone(),
        other => panic!("expected return, got {:?}", other),
    };
    assert_eq!(env.type_of(&ret), Some(&Type::I32));
}

#[test]
fn declaration_cycles_are_rejected() {
    let result = resolve(&parse_ok("struct S { m : T, }\nalias T = S;\n"));
    assert!(matches!(result, Err(Error::CyclicModuleDeclaration(_))));
}

#[test]
fn duplicate_module_names_are_rejected() {
    let result = resolve(&parse_ok("const a = 1;\nconst a = 2;\n"));
    assert!(matches!(result, Err(Error::DuplicateModuleName(name)) if name == "a"));
}

#[test]
fn unknown_names_are_reported() {
    assert!(matches!(
        resolve(&parse_ok("fn f() { g(); }")),
        Err(Error::UnknownCallee(name)) if name == "g"
    ));
    assert!(matches!(
        resolve(&parse_ok("fn f() -> i32 { return x; }")),
        Err(Error::UnknownIdentifier(name)) if name == "x"
    ));
    assert!(matches!(
        resolve(&parse_ok("var<private> v : Unknown;")),
        Err(Error::UnknownType(name)) if name == "Unknown"
    ));
}

#[test]
fn mismatched_operands_are_rejected() {
    assert!(matches!(
        resolve(&parse_ok("fn f(a : i32, b : u32) -> i32 { return a + b; }")),
        Err(Error::NoCommonType(_, _))
    ));
    assert!(matches!(
        resolve(&parse_ok("fn f() { var x : u32 = 1i; }")),
        Err(Error::TypeMismatch(_))
    ));
}

#[test]
fn builtin_calls_and_constructors_type() {
    let tu = parse_ok(
        "fn f() -> f32 {\n\
         \x20 let v = vec3<f32>(1.0, 2.0, 3.0);\n\
         \x20 let w = vec3f();\n\
         \x20 let d = dot(v, w);\n\
         \x20 let c = clamp(d, 0.0, 1.0);\n\
         \x20 let m = mat2x2f(1.0, 0.0, 0.0, 1.0);\n\
         \x20 let col = m[0];\n\
         \x20 let b = bitcast<u32>(1i);\n\
         \x20 return c;\n\
         }\n",
    );
    let env = resolve(&tu).unwrap();
    let f = function(&tu, "f");
    let stmts = body_statements(f);
    let entry_type = |index: usize, name: &str| {
        let scope = env.scope_before(&stmts[index]).unwrap();
        match scope.lookup(name) {
            Some(ScopeEntry::LocalValue { ty, .. }) => ty.clone(),
            other => panic!("unexpected entry for {}: {:?}", name, other),
        }
    };
    // Each entry is visible from the statement after its declaration.
    assert_eq!(entry_type(1, "v"), Type::vector(3, Type::F32));
    assert_eq!(entry_type(2, "w"), Type::vector(3, Type::F32));
    assert_eq!(entry_type(3, "d"), Type::F32);
    assert_eq!(entry_type(4, "c"), Type::F32);
    assert_eq!(entry_type(5, "m"), Type::matrix(2, 2, Type::F32));
    assert_eq!(entry_type(6, "col"), Type::vector(2, Type::F32));
    assert_eq!(entry_type(7, "b"), Type::U32);
}

/// Every expression reachable from a function body has exactly one
/// recorded type, and every statement an enclosing scope.
#[test]
fn environment_is_total_over_bodies() {
    let tu = parse_ok(
        "const LIMIT = 4;\n\
         struct Pair { a : i32, b : f32, }\n\
         fn g(p : Pair) -> i32 { return p.a; }\n\
         fn f(x : i32) -> i32 {\n\
         \x20 var total : i32 = 0;\n\
         \x20 for (var i : i32 = 0; i < LIMIT; i++) {\n\
         \x20   if x > 0 { total += i; } else { continue; }\n\
         \x20 }\n\
         \x20 switch total {\n\
         \x20   case 0: { total = 1; }\n\
         \x20   default: { }\n\
         \x20 }\n\
         \x20 loop {\n\
         \x20   total = total - 1;\n\
         \x20   continuing { break if total < g(Pair(1, 2.0)); }\n\
         \x20 }\n\
         \x20 return total;\n\
         }\n",
    );
    let env = resolve(&tu).unwrap();

    struct Totals<'a> {
        env: &'a ResolvedEnvironment,
        expressions: usize,
        statements: usize,
    }

    fn check(node: NodeRef<'_>, totals: &mut Totals<'_>) {
        match node {
            NodeRef::Expression(e) => {
                assert!(
                    totals.env.type_of(e).is_some(),
                    "expression without a type: {:?}",
                    e
                );
                totals.expressions += 1;
            }
            NodeRef::Statement(s) => {
                assert!(
                    totals.env.scope_before(s).is_some(),
                    "statement without a scope: {:?}",
                    s
                );
                totals.statements += 1;
            }
            _ => {}
        }
        visit_children(&mut |child, state| check(child, state), node, totals);
    }

    let mut totals = Totals {
        env: &env,
        expressions: 0,
        statements: 0,
    };
    for decl in &tu.declarations {
        if let GlobalDecl::Function(f) = &**decl {
            check(NodeRef::Statement(&f.body), &mut totals);
        }
    }
    assert!(totals.expressions > 20);
    assert!(totals.statements > 10);
}
