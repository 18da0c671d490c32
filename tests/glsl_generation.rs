mod common;

use std::rc::Rc;

use node_forge_shadergen::genshader::{GlslShaderGenerator, PIXEL, VERTEX, glsl};
use node_forge_shadergen::{Error, GenContext, GenOptions, ImplementationRegistry, TypeSystem};

use common::{constant_gray, diffuse_surface, document, generate, last_statement, no_lights};

#[test]
fn constant_color_is_written_to_the_output() {
    let doc = document(constant_gray());
    let shader = generate(&doc, "NG_gray", glsl::TARGET, no_lights()).unwrap();
    let pixel = shader.source_code(PIXEL).unwrap();

    assert_eq!(
        last_statement(pixel),
        "out1 = vec4(vec3(0.500000, 0.500000, 0.500000), 1.0);"
    );
    assert!(!pixel.contains("sampleLightSource("));
    assert!(!pixel.contains("activeLightIndex"));
    assert!(pixel.starts_with("#version 400"));
    assert!(pixel.contains("out vec4 out1;"));
    assert!(shader.source_code(VERTEX).unwrap().contains("gl_Position"));
}

#[test]
fn generation_is_deterministic_across_generators() {
    let doc = document(diffuse_surface());
    let a = generate(&doc, "NG_plastic", glsl::TARGET, GenOptions::default()).unwrap();
    let b = generate(&doc, "NG_plastic", glsl::TARGET, GenOptions::default()).unwrap();
    for stage in [VERTEX, PIXEL] {
        assert_eq!(a.source_code(stage), b.source_code(stage), "stage {stage} differs");
    }
}

#[test]
fn single_diffuse_surface_emits_one_call_per_closure_context() {
    let doc = document(diffuse_surface());
    let shader = generate(&doc, "NG_plastic", glsl::TARGET, GenOptions::default()).unwrap();
    let pixel = shader.source_code(PIXEL).unwrap();

    assert_eq!(pixel.matches("mx_diffuse_brdf_reflection(L, V").count(), 1, "{pixel}");
    assert_eq!(pixel.matches("mx_diffuse_brdf_indirect(V").count(), 1, "{pixel}");
    assert_eq!(pixel.matches("_transmission(").count(), 0, "{pixel}");
    assert!(pixel.contains("for (int activeLightIndex = 0;"));
    assert!(pixel.contains("mx_point_light(light, position, result);"));
    assert_eq!(last_statement(pixel), "out1 = vec4(surf_out.color, 1.0);");
}

#[test]
fn transparency_adds_the_transmission_pass() {
    let doc = document(serde_json::json!({
        "nodeGraphs": [{
            "name": "NG_glass",
            "nodes": [
                {
                    "name": "glass",
                    "category": "dielectric_bsdf",
                    "type": "BSDF"
                },
                {
                    "name": "surf",
                    "category": "surface",
                    "type": "surfaceshader",
                    "inputs": [{ "name": "bsdf", "type": "BSDF", "nodename": "glass" }]
                }
            ],
            "outputs": [{ "name": "out", "type": "surfaceshader", "nodename": "surf" }]
        }]
    }));
    let options = GenOptions {
        hw_transparency: true,
        ..GenOptions::default()
    };
    let shader = generate(&doc, "NG_glass", glsl::TARGET, options).unwrap();
    let pixel = shader.source_code(PIXEL).unwrap();
    assert_eq!(pixel.matches("mx_dielectric_bsdf_transmission(V").count(), 1, "{pixel}");
    assert!(pixel.contains("outAlpha"));
}

#[test]
fn nodes_used_by_one_branch_move_inside_the_conditional() {
    let doc = document(serde_json::json!({
        "nodeGraphs": [{
            "name": "NG_pick",
            "inputs": [{ "name": "test", "type": "float", "value": "0.25" }],
            "nodes": [
                {
                    "name": "dark",
                    "category": "multiply",
                    "type": "color3",
                    "inputs": [{ "name": "in1", "type": "color3", "value": "0.1, 0.1, 0.1" }]
                },
                {
                    "name": "light",
                    "category": "add",
                    "type": "color3",
                    "inputs": [{ "name": "in1", "type": "color3", "value": "0.9, 0.9, 0.9" }]
                },
                {
                    "name": "pick",
                    "category": "compare",
                    "type": "color3",
                    "inputs": [
                        { "name": "intest", "type": "float", "interfacename": "test" },
                        { "name": "cutoff", "type": "float", "value": "0.5" },
                        { "name": "in1", "type": "color3", "nodename": "dark" },
                        { "name": "in2", "type": "color3", "nodename": "light" }
                    ]
                }
            ],
            "outputs": [{ "name": "out", "type": "color3", "nodename": "pick" }]
        }]
    }));
    let shader = generate(&doc, "NG_pick", glsl::TARGET, no_lights()).unwrap();
    let pixel = shader.source_code(PIXEL).unwrap();

    assert!(pixel.contains("// Omitted node 'dark'. Only used in conditional node 'pick'"), "{pixel}");
    assert!(pixel.contains("// Omitted node 'light'. Only used in conditional node 'pick'"));
    assert!(pixel.contains("if (test <= pick_cutoff)"), "{pixel}");
    let branch = pixel.find("if (").unwrap();
    assert!(pixel[branch..].contains("vec3 dark_out = "));
    assert!(pixel[branch..].contains("vec3 light_out = "));
}

#[test]
fn switch_with_constant_selector_drops_unused_branches() {
    let doc = document(serde_json::json!({
        "nodeGraphs": [{
            "name": "NG_switch",
            "nodes": [
                {
                    "name": "first",
                    "category": "multiply",
                    "type": "color3",
                    "inputs": [{ "name": "in1", "type": "color3", "value": "1.0, 0.0, 0.0" }]
                },
                {
                    "name": "second",
                    "category": "add",
                    "type": "color3",
                    "inputs": [{ "name": "in1", "type": "color3", "value": "0.0, 1.0, 0.0" }]
                },
                {
                    "name": "pick",
                    "category": "switch",
                    "type": "color3",
                    "inputs": [
                        { "name": "in1", "type": "color3", "nodename": "first" },
                        { "name": "in2", "type": "color3", "nodename": "second" },
                        { "name": "which", "type": "float", "value": "1" }
                    ]
                }
            ],
            "outputs": [{ "name": "out", "type": "color3", "nodename": "pick" }]
        }]
    }));
    let shader = generate(&doc, "NG_switch", glsl::TARGET, no_lights()).unwrap();
    let pixel = shader.source_code(PIXEL).unwrap();
    assert!(!pixel.contains("first_out"), "{pixel}");
    assert!(pixel.contains("vec3 second_out = "));
    assert_eq!(last_statement(pixel), "out1 = vec4(second_out, 1.0);");
    assert!(shader.graph.find_node("pick").is_none());
}

#[test]
fn switch_selector_fed_by_a_constant_node_drops_unused_branches() {
    let doc = document(serde_json::json!({
        "nodeGraphs": [{
            "name": "NG_switch",
            "nodes": [
                {
                    "name": "first",
                    "category": "multiply",
                    "type": "color3",
                    "inputs": [{ "name": "in1", "type": "color3", "value": "1.0, 0.0, 0.0" }]
                },
                {
                    "name": "second",
                    "category": "add",
                    "type": "color3",
                    "inputs": [{ "name": "in1", "type": "color3", "value": "0.0, 1.0, 0.0" }]
                },
                {
                    "name": "pick",
                    "category": "switch",
                    "type": "color3",
                    "inputs": [
                        { "name": "in1", "type": "color3", "nodename": "first" },
                        { "name": "in2", "type": "color3", "nodename": "second" },
                        { "name": "which", "type": "float", "nodename": "selector" }
                    ]
                },
                {
                    "name": "selector",
                    "category": "constant",
                    "type": "float",
                    "inputs": [{ "name": "value", "type": "float", "value": "1" }]
                }
            ],
            "outputs": [{ "name": "out", "type": "color3", "nodename": "pick" }]
        }]
    }));
    let shader = generate(&doc, "NG_switch", glsl::TARGET, no_lights()).unwrap();
    let pixel = shader.source_code(PIXEL).unwrap();
    assert!(!pixel.contains("first_out"), "{pixel}");
    assert!(!pixel.contains("pick_which"), "{pixel}");
    assert_eq!(last_statement(pixel), "out1 = vec4(second_out, 1.0);");
    assert!(shader.graph.find_node("pick").is_none());
    assert!(shader.graph.find_node("selector").is_none());
}

/// `dark` on in1 and `light` on in2 of a compare against cutoff 0.5.
fn compare_graph(intest: serde_json::Value, mut extra: Vec<serde_json::Value>) -> serde_json::Value {
    let mut nodes = vec![
        serde_json::json!({
            "name": "dark",
            "category": "multiply",
            "type": "color3",
            "inputs": [{ "name": "in1", "type": "color3", "value": "0.1, 0.1, 0.1" }]
        }),
        serde_json::json!({
            "name": "light",
            "category": "add",
            "type": "color3",
            "inputs": [{ "name": "in1", "type": "color3", "value": "0.9, 0.9, 0.9" }]
        }),
        serde_json::json!({
            "name": "pick",
            "category": "compare",
            "type": "color3",
            "inputs": [
                intest,
                { "name": "cutoff", "type": "float", "value": "0.5" },
                { "name": "in1", "type": "color3", "nodename": "dark" },
                { "name": "in2", "type": "color3", "nodename": "light" }
            ]
        }),
    ];
    nodes.append(&mut extra);
    serde_json::json!({
        "nodeGraphs": [{
            "name": "NG_cmp",
            "nodes": nodes,
            "outputs": [{ "name": "out", "type": "color3", "nodename": "pick" }]
        }]
    })
}

#[test]
fn compare_at_the_cutoff_takes_the_first_branch() {
    for (test, kept, dropped) in [("0.5", "dark", "light"), ("0.75", "light", "dark")] {
        let intest = serde_json::json!({ "name": "intest", "type": "float", "value": test });
        let doc = document(compare_graph(intest, Vec::new()));
        let shader = generate(&doc, "NG_cmp", glsl::TARGET, no_lights()).unwrap();
        let pixel = shader.source_code(PIXEL).unwrap();
        assert!(!pixel.contains(&format!("{dropped}_out")), "intest {test}: {pixel}");
        assert_eq!(last_statement(pixel), format!("out1 = vec4({kept}_out, 1.0);"));
        assert!(shader.graph.find_node("pick").is_none());
    }
}

#[test]
fn compare_selector_fed_by_a_constant_node_is_decided_statically() {
    let intest = serde_json::json!({ "name": "intest", "type": "float", "nodename": "level" });
    let level = serde_json::json!({
        "name": "level",
        "category": "constant",
        "type": "float",
        "inputs": [{ "name": "value", "type": "float", "value": "0.9" }]
    });
    let doc = document(compare_graph(intest, vec![level]));
    let shader = generate(&doc, "NG_cmp", glsl::TARGET, no_lights()).unwrap();
    let pixel = shader.source_code(PIXEL).unwrap();
    assert!(!pixel.contains("dark_out"), "{pixel}");
    assert!(!pixel.contains("pick_cutoff"));
    assert_eq!(last_statement(pixel), "out1 = vec4(light_out, 1.0);");
}

#[test]
fn compare_selector_fed_by_a_computed_node_stays_conditional() {
    let intest = serde_json::json!({ "name": "intest", "type": "float", "nodename": "level" });
    let level = serde_json::json!({
        "name": "level",
        "category": "add",
        "type": "float",
        "inputs": [
            { "name": "in1", "type": "float", "value": "0.25" },
            { "name": "in2", "type": "float", "value": "0.5" }
        ]
    });
    let doc = document(compare_graph(intest, vec![level]));
    let shader = generate(&doc, "NG_cmp", glsl::TARGET, no_lights()).unwrap();
    let pixel = shader.source_code(PIXEL).unwrap();

    assert!(shader.graph.find_node("pick").is_some());
    assert!(pixel.contains("if (level_out <= pick_cutoff)"), "{pixel}");
    let branch = pixel.find("if (").unwrap();
    assert!(pixel[..branch].contains("float level_out = "));
    assert!(pixel[branch..].contains("vec3 dark_out = "));
    assert!(pixel[branch..].contains("vec3 light_out = "));
}

#[test]
fn implementations_are_shared_within_a_context_only() {
    let doc = document(constant_gray());
    let generator = GlslShaderGenerator::new();
    let types = TypeSystem::standard();
    let registry = ImplementationRegistry::for_generator(&generator);
    let def = doc.node_def("ND_add_color3").unwrap();
    let imp = doc.implementation_for(def, glsl::TARGET).unwrap();

    let mut ctx = GenContext::new(&generator, &types, &registry);
    let a = ctx.get_implementation(&doc, imp).unwrap();
    let b = ctx.get_implementation(&doc, imp).unwrap();
    assert!(Rc::ptr_eq(&a, &b));
    assert!(ctx.find_implementation("IM_add_color3").is_some());

    let mut other = GenContext::new(&generator, &types, &registry);
    let c = other.get_implementation(&doc, imp).unwrap();
    assert!(!Rc::ptr_eq(&a, &c));
}

#[test]
fn nodes_of_one_definition_share_an_implementation() {
    let doc = document(serde_json::json!({
        "nodeGraphs": [{
            "name": "NG_sum",
            "nodes": [
                {
                    "name": "a",
                    "category": "add",
                    "type": "color3",
                    "inputs": [{ "name": "in1", "type": "color3", "value": "0.1, 0.2, 0.3" }]
                },
                {
                    "name": "b",
                    "category": "add",
                    "type": "color3",
                    "inputs": [{ "name": "in1", "type": "color3", "nodename": "a" }]
                }
            ],
            "outputs": [{ "name": "out", "type": "color3", "nodename": "b" }]
        }]
    }));
    let shader = generate(&doc, "NG_sum", glsl::TARGET, no_lights()).unwrap();
    let a = shader.graph.find_node("a").unwrap();
    let b = shader.graph.find_node("b").unwrap();
    assert!(Rc::ptr_eq(&a.imp, &b.imp));
}

#[test]
fn cyclic_graph_fails_generation() {
    let doc = document(serde_json::json!({
        "nodeGraphs": [{
            "name": "NG_loop",
            "nodes": [
                {
                    "name": "a",
                    "category": "add",
                    "type": "color3",
                    "inputs": [{ "name": "in1", "type": "color3", "nodename": "b" }]
                },
                {
                    "name": "b",
                    "category": "add",
                    "type": "color3",
                    "inputs": [{ "name": "in1", "type": "color3", "nodename": "a" }]
                }
            ],
            "outputs": [{ "name": "out", "type": "color3", "nodename": "a" }]
        }]
    }));
    let err = generate(&doc, "NG_loop", glsl::TARGET, no_lights()).unwrap_err();
    assert!(matches!(err, Error::FoundCycle(_)), "{err}");
}

#[test]
fn unknown_node_category_has_no_implementation() {
    let doc = document(serde_json::json!({
        "nodeGraphs": [{
            "name": "NG_noise",
            "nodes": [{ "name": "n", "category": "fractal3d", "type": "color3" }],
            "outputs": [{ "name": "out", "type": "color3", "nodename": "n" }]
        }]
    }));
    let err = generate(&doc, "NG_noise", glsl::TARGET, no_lights()).unwrap_err();
    assert_eq!(err.kind(), "NoImplementation");
}
