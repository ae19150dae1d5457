//! Uniformity analyzer integration tests: the barrier seed scenarios and
//! tag propagation through user calls.

use std::io::Write;
use std::sync::{Arc, Mutex};

use wyvern::uniformity::{
    analyze, analyze_with_options, FunctionTag, FunctionTags, UniformityOptions,
};
use wyvern::{parse, resolve, Error, Severity};

fn tags_of(src: &str, function: &str) -> FunctionTags {
    let tu = parse(src).expect("source parses");
    let env = resolve(&tu).expect("source resolves");
    let analysis = analyze(&tu, &env).expect("uniformity analysis succeeds");
    analysis.tags(function).expect("function analyzed").clone()
}

#[test]
fn unconditional_barrier_requires_uniform_call_site() {
    let tags = tags_of("fn f() { workgroupBarrier(); }", "f");
    assert!(tags.call_site_must_be_uniform());
    assert!(tags.parameters.is_empty());
}

#[test]
fn s3_conditional_barrier_taints_parameter() {
    let tags = tags_of(
        "fn f(a : u32) { if a != 0u { workgroupBarrier(); } }",
        "f",
    );
    assert!(tags.call_site_must_be_uniform());
    assert!(tags.parameter_must_be_uniform(0));
}

#[test]
fn barrier_after_conditional_return_still_constrains() {
    let tags = tags_of(
        "fn f(a : u32) { if a != 0u { return; } workgroupBarrier(); }",
        "f",
    );
    assert!(tags.call_site_must_be_uniform());
    assert!(tags.parameter_must_be_uniform(0));
}

#[test]
fn s4_unreachable_barrier_contributes_nothing() {
    let tags = tags_of(
        "fn f() -> i32 { loop { return 0; } workgroupBarrier(); return 0; }",
        "f",
    );
    assert!(!tags.call_site_must_be_uniform());
}

#[test]
fn barrier_behind_both_branch_returns_is_unreachable() {
    let tags = tags_of(
        "fn f(a : u32) -> u32 {\n\
         \x20 if a != 0u { return 1u; } else { return 2u; }\n\
         \x20 workgroupBarrier();\n\
         \x20 return 0u;\n\
         }",
        "f",
    );
    assert!(!tags.call_site_must_be_uniform());
    assert!(!tags.parameter_must_be_uniform(0));
}

#[test]
fn storage_dependent_barrier_is_a_violation() {
    let tu = parse(
        "@group(0) @binding(0) var<storage, read_write> s : i32;\n\
         fn f() { if s > 0 { workgroupBarrier(); } }\n",
    )
    .unwrap();
    let env = resolve(&tu).unwrap();
    match analyze(&tu, &env) {
        Err(Error::UniformityViolation {
            severity: Severity::Error,
            function,
            ..
        }) => assert_eq!(function, "f"),
        other => panic!("expected an error-severity violation, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn uniform_buffer_conditions_are_uniform() {
    // A read-only uniform variable never taints the barrier.
    let tags = tags_of(
        "@group(0) @binding(0) var<uniform> u : i32;\n\
         fn f() { if u > 0 { workgroupBarrier(); } }\n",
        "f",
    );
    assert!(tags.call_site_must_be_uniform());
}

#[test]
fn callee_tags_propagate_to_callers() {
    let src = "fn g() { workgroupBarrier(); }\n\
               fn f(a : u32) { if a != 0u { g(); } }\n";
    let g = tags_of(src, "g");
    assert!(g.call_site_must_be_uniform());
    let f = tags_of(src, "f");
    assert!(f.call_site_must_be_uniform());
    assert!(f.parameter_must_be_uniform(0));
}

#[test]
fn nonuniform_builtin_parameter_taints_return_value() {
    let tags = tags_of(
        "fn f(@builtin(local_invocation_index) idx : u32) -> u32 { return idx; }",
        "f",
    );
    assert_eq!(tags.function_tag, FunctionTag::ReturnValueMayBeNonUniform);
}

#[test]
fn derivative_severity_is_configurable() {
    let tu = parse(
        "@group(0) @binding(0) var<storage, read_write> s : f32;\n\
         fn f() { if s > 0.0 { _ = dpdx(1.0); } }\n",
    )
    .unwrap();
    let env = resolve(&tu).unwrap();

    // At the default (error) severity the violation aborts the analysis.
    assert!(matches!(
        analyze(&tu, &env),
        Err(Error::UniformityViolation {
            severity: Severity::Error,
            ..
        })
    ));

    // At warning severity it is collected as a diagnostic instead.
    let options = UniformityOptions {
        derivative_severity: Severity::Warning,
        dot: None,
    };
    let analysis = analyze_with_options(&tu, &env, &options).unwrap();
    assert_eq!(analysis.diagnostics.len(), 1);
    assert_eq!(analysis.diagnostics[0].severity, Severity::Warning);
}

#[test]
fn warning_severity_tags_use_their_sweep() {
    let options = UniformityOptions {
        derivative_severity: Severity::Warning,
        dot: None,
    };
    let tu = parse("fn f(a : f32) -> f32 { if a > 0.0 { return dpdx(a); } return 0.0; }").unwrap();
    let env = resolve(&tu).unwrap();
    let analysis = analyze_with_options(&tu, &env, &options).unwrap();
    let tags = analysis.tags("f").unwrap();
    assert!(matches!(
        tags.call_site,
        wyvern::uniformity::CallSiteTag::RequiredToBeUniform(Severity::Warning)
    ));
    assert_eq!(tags.function_tag, FunctionTag::ReturnValueMayBeNonUniform);
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn dot_output_is_emitted_through_the_shared_writer() {
    let buffer = SharedBuffer::default();
    let options = UniformityOptions {
        derivative_severity: Severity::Error,
        dot: Some(Arc::new(Mutex::new(buffer.clone()))),
    };
    let tu = parse("fn f(a : u32) { if a != 0u { workgroupBarrier(); } }").unwrap();
    let env = resolve(&tu).unwrap();
    analyze_with_options(&tu, &env, &options).unwrap();

    let bytes = buffer.0.lock().unwrap().clone();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("digraph uniformity {"));
    assert!(text.contains("rankdir=BT"));
    assert!(text.contains("subgraph cluster_f"));
    assert!(text.contains("->"));
    assert!(text.trim_end().ends_with('}'));
}
