//! Reduction integration tests: the metamorphic S5 scenario, driver
//! monotonicity, and type preservation of arbitrary-expression shrinking.

use std::cell::Cell;
use std::rc::Rc;

use wyvern::ast::{
    visit_children, AugmentedExpression, Expression, GlobalDecl, NodeRef, Statement,
    TranslationUnit,
};
use wyvern::augment::{
    inject_dead_code, obfuscate_known_values, FuzzerSettings, ShaderJob, UniformScalar,
    UniformSnapshot,
};
use wyvern::reduce::reduce;
use wyvern::resolver::{resolve, ScopeEntry};
use wyvern::rewrite::Rewriter;
use wyvern::types::Type;
use wyvern::parse;

/// Deterministic settings: always insert, always pick the first choice.
struct AlwaysSettings;

impl FuzzerSettings for AlwaysSettings {
    fn random_int(&mut self, _limit: usize) -> usize {
        0
    }

    fn random_bool(&mut self) -> bool {
        false
    }

    fn max_depth(&self) -> u32 {
        2
    }

    fn false_by_construction_weights(&self, _depth: u32) -> [u32; 5] {
        [1, 0, 0, 0, 0]
    }

    fn true_by_construction_weights(&self, _depth: u32) -> [u32; 5] {
        [1, 0, 0, 0, 0]
    }
}

fn count_nodes(tu: &TranslationUnit, mut predicate: impl FnMut(NodeRef<'_>) -> bool) -> usize {
    fn walk<F: FnMut(NodeRef<'_>)>(node: NodeRef<'_>, f: &mut F) {
        f(node);
        visit_children(&mut |child, state: &mut F| walk(child, state), node, f);
    }
    let mut count = 0;
    walk(NodeRef::TranslationUnit(tu), &mut |node| {
        if predicate(node) {
            count += 1;
        }
    });
    count
}

fn count_dead_fragments(tu: &TranslationUnit) -> usize {
    count_nodes(tu, |node| {
        matches!(
            node,
            NodeRef::Statement(Statement::DeadCodeFragment { .. })
        )
    })
}

fn count_known_values(tu: &TranslationUnit) -> usize {
    count_nodes(tu, |node| {
        matches!(
            node,
            NodeRef::Expression(Expression::Augmented(AugmentedExpression::KnownValue { .. }))
        )
    })
}

#[test]
fn s5_dead_code_goes_known_values_stay() {
    let tu = parse(
        "@group(0) @binding(0) var<uniform> u_input : i32;\n\
         fn f() -> i32 { var a : i32 = 5; return a; }\n",
    )
    .unwrap();
    let job = ShaderJob {
        tu: Rc::new(tu),
        uniforms: UniformSnapshot {
            scalars: vec![UniformScalar {
                variable: "u_input".into(),
                member: None,
                value: 7,
            }],
        },
    };

    let mut settings = AlwaysSettings;
    let job = obfuscate_known_values(&job, &mut settings);
    assert_eq!(count_known_values(&job.tu), 1);
    let job = inject_dead_code(&job, &mut settings);
    assert!(count_dead_fragments(&job.tu) >= 3);
    resolve(&job.tu).expect("augmented job resolves");

    let (best, _) = reduce(&job, |candidate| count_known_values(&candidate.tu) >= 1)
        .expect("input is interesting");

    assert_eq!(count_dead_fragments(&best.tu), 0);
    assert_eq!(count_known_values(&best.tu), 1);
    resolve(&best.tu).expect("reduced job resolves");
}

#[test]
fn reduction_result_is_always_interesting() {
    let tu = parse(
        "@group(0) @binding(0) var<uniform> u_input : i32;\n\
         fn f() -> i32 { return 3; }\n",
    )
    .unwrap();
    let job = ShaderJob {
        tu: Rc::new(tu),
        uniforms: UniformSnapshot {
            scalars: vec![UniformScalar {
                variable: "u_input".into(),
                member: None,
                value: 2,
            }],
        },
    };
    let mut settings = AlwaysSettings;
    let job = inject_dead_code(&obfuscate_known_values(&job, &mut settings), &mut settings);
    // One body statement means two insertion points, so the fragment
    // count starts even and the input is interesting.
    assert_eq!(count_dead_fragments(&job.tu) % 2, 0);

    // A quirky predicate: interesting iff an even number of dead
    // fragments remain. The final answer must satisfy it.
    let (best, _) = reduce(&job, |candidate| {
        count_dead_fragments(&candidate.tu) % 2 == 0
    })
    .expect("input is interesting");
    assert_eq!(count_dead_fragments(&best.tu) % 2, 0);
}

/// Wraps the initializer of the second statement of `f` in an
/// ArbitraryExpression marker.
fn wrap_initializer_as_arbitrary(tu: &TranslationUnit) -> TranslationUnit {
    let target: Rc<Expression> = tu
        .declarations
        .iter()
        .find_map(|decl| match &**decl {
            GlobalDecl::Function(f) => match &*f.body {
                Statement::Compound(c) => c.statements.iter().find_map(|s| match &**s {
                    Statement::ValueDecl { initializer, .. } => Some(initializer.clone()),
                    _ => None,
                }),
                _ => None,
            },
            _ => None,
        })
        .expect("let initializer present");

    let wrapped = Cell::new(false);
    let mut callback = |e: &Rc<Expression>| -> Option<Rc<Expression>> {
        if !wrapped.get() && Rc::ptr_eq(e, &target) {
            wrapped.set(true);
            Some(Rc::new(Expression::Augmented(
                AugmentedExpression::ArbitraryExpression(e.clone()),
            )))
        } else {
            None
        }
    };
    let mut rewriter = Rewriter {
        expression: Some(&mut callback),
        ..Rewriter::default()
    };
    rewriter.rewrite_unit(tu)
}

#[test]
fn arbitrary_expression_shrinking_preserves_the_type() {
    let tu = parse("fn f() -> i32 { var a : i32 = 2; let b = a + 3; return b; }").unwrap();
    let tu = wrap_initializer_as_arbitrary(&tu);
    let job = ShaderJob {
        tu: Rc::new(tu),
        uniforms: UniformSnapshot::default(),
    };
    resolve(&job.tu).expect("marked tree resolves");

    let (best, _) = reduce(&job, |_| true).expect("input is interesting");
    let env = resolve(&best.tu).expect("shrunk tree resolves");

    // `b` keeps its i32 type through every shrink step.
    for decl in &best.tu.declarations {
        if let GlobalDecl::Function(f) = &**decl {
            if let Statement::Compound(c) = &*f.body {
                let ret = c.statements.last().unwrap();
                let scope = env.scope_before(ret).unwrap();
                match scope.lookup("b") {
                    Some(ScopeEntry::LocalValue { ty, .. }) => assert_eq!(ty, &Type::I32),
                    other => panic!("unexpected entry {:?}", other),
                }
            }
        }
    }

    // Fully shrunk: no markers remain.
    let markers = count_nodes(&best.tu, |node| {
        matches!(
            node,
            NodeRef::Expression(Expression::Augmented(
                AugmentedExpression::ArbitraryExpression(_)
            ))
        )
    });
    assert_eq!(markers, 0);
}
