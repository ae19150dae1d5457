//! Parse/print round-trip: for every corpus snippet, printing the parse
//! and reparsing it reaches a structural fixed point.

use wyvern::{parse, print};

fn assert_round_trip(source: &str) {
    let first = parse(source).unwrap_or_else(|e| panic!("parse failed for {:?}: {}", source, e));
    let printed = print(&first);
    let second =
        parse(&printed).unwrap_or_else(|e| panic!("reparse failed for {:?}: {}", printed, e));
    assert_eq!(first, second, "structural mismatch after printing:\n{}", printed);
    assert_eq!(print(&second), printed, "printing is not a fixed point");
}

macro_rules! round_trip {
    ($name:ident, $source:expr) => {
        #[test]
        fn $name() {
            assert_round_trip($source);
        }
    };
}

round_trip!(directives_and_globals, "enable f16;\nconst one = 1;\nvar<private> v : f32 = 0.5;\n");

round_trip!(
    bindings_and_structs,
    "@group(0) @binding(0) var<storage, read_write> s : i32;\n\
     struct Light { pos : vec3<f32>, @align(16) intensity : f32, }\n\
     alias Lights = array<Light, 4>;\n"
);

round_trip!(
    textures_and_samplers,
    "@group(0) @binding(0) var t : texture_2d<f32>;\n\
     @group(0) @binding(1) var sm : sampler;\n\
     @group(0) @binding(2) var st : texture_storage_2d<rgba8unorm, write>;\n\
     @group(0) @binding(3) var dt : texture_depth_cube_array;\n"
);

round_trip!(
    compute_entry_point,
    "@group(0) @binding(0) var<uniform> u : vec4<f32>;\n\
     @compute @workgroup_size(8, 8, 1)\n\
     fn main(@builtin(global_invocation_id) gid : vec3<u32>) {\n\
     \x20 workgroupBarrier();\n\
     }\n"
);

round_trip!(
    control_flow,
    "fn f(x : i32) -> i32 {\n\
     \x20 var total : i32 = 0;\n\
     \x20 for (var i : i32 = 0; i < x; i++) {\n\
     \x20   if i % 2 == 0 { total += i; } else if i > 10 { break; } else { continue; }\n\
     \x20 }\n\
     \x20 while total > 100 { total = total / 2; }\n\
     \x20 return total;\n\
     }\n"
);

round_trip!(
    loop_with_continuing,
    "fn f() -> i32 {\n\
     \x20 var i : i32 = 0;\n\
     \x20 loop {\n\
     \x20   i = i + 1;\n\
     \x20   continuing {\n\
     \x20     i = i * 2;\n\
     \x20     break if i > 16;\n\
     \x20   }\n\
     \x20 }\n\
     \x20 return i;\n\
     }\n"
);

round_trip!(
    switch_clauses,
    "fn f(x : i32) -> i32 {\n\
     \x20 var r : i32 = 0;\n\
     \x20 switch x {\n\
     \x20   case 1, 2: { r = 1; }\n\
     \x20   case default, 3: { r = 2; }\n\
     \x20   default: { r = 3; }\n\
     \x20 }\n\
     \x20 return r;\n\
     }\n"
);

round_trip!(
    pointers_and_atomics,
    "var<workgroup> g : atomic<u32>;\n\
     fn f(p : ptr<function, i32>) {\n\
     \x20 *p = *p + 1;\n\
     \x20 let old = atomicAdd(&g, 1u);\n\
     \x20 _ = old;\n\
     }\n"
);

round_trip!(
    expressions_and_swizzles,
    "fn f(v : vec4<f32>) -> f32 {\n\
     \x20 let a = v.xyz;\n\
     \x20 let b = (a.x + a.y) * a.z;\n\
     \x20 let c = bitcast<u32>(1i);\n\
     \x20 let d = vec2f(b, b)[0];\n\
     \x20 let e = !(b > 0.0) || (c == 1u && b < 2.0);\n\
     \x20 return select(0.0, 1.0, e);\n\
     }\n"
);

round_trip!(
    literal_suffixes_survive,
    "fn f() {\n\
     \x20 let a = 1;\n\
     \x20 let b = 1i;\n\
     \x20 let c = 1u;\n\
     \x20 let d = 0x1f;\n\
     \x20 let e = 1.5;\n\
     \x20 let g = 1.5f;\n\
     \x20 let h = 2e-3;\n\
     \x20 let i = 1f;\n\
     }\n"
);

round_trip!(
    nested_templates_split_shift,
    "var<private> grid : array<vec4<f32>, 2>;\nvar<private> rows : array<array<f32, 4>>;\n"
);

round_trip!(
    const_asserts_and_empty_decls,
    "const N = 4;\nconst_assert N > 0;\n;\nfn f() { const_assert N == 4; }\n"
);

round_trip!(
    overrides_and_calls,
    "@id(0) override scale : f32 = 1.0;\n\
     fn helper(x : f32) -> f32 { return x * scale; }\n\
     fn f() -> f32 { return helper(2.0); }\n"
);

round_trip!(
    increments_and_phantom_assignment,
    "fn f() {\n\
     \x20 var i : i32 = 0;\n\
     \x20 i++;\n\
     \x20 i--;\n\
     \x20 i <<= 1u;\n\
     \x20 _ = i;\n\
     \x20 var v : vec3<f32>;\n\
     \x20 v.x = 1.0;\n\
     \x20 v[1] = 2.0;\n\
     }\n"
);
