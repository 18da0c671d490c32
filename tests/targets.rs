mod common;

use node_forge_shadergen::genshader::{PIXEL, VERTEX, msl, osl};
use node_forge_shadergen::{GenOptions, generator_for};

use common::{constant_gray, diffuse_surface, document, generate, no_lights};

#[test]
fn every_target_has_a_generator() {
    for target in ["genglsl", "genmsl", "genosl"] {
        let generator = generator_for(target).unwrap();
        assert_eq!(generator.target(), target);
    }
    assert!(generator_for("genwgsl").is_none());
}

#[test]
fn msl_wraps_stages_in_entry_points() {
    let doc = document(diffuse_surface());
    let shader = generate(&doc, "NG_plastic", msl::TARGET, GenOptions::default()).unwrap();

    let vertex = shader.source_code(VERTEX).unwrap();
    assert!(vertex.contains("using namespace metal;"));
    assert!(vertex.contains("vertex VertexData VertexMain("));
    assert!(vertex.contains("[[attribute(0)]]"));

    let pixel = shader.source_code(PIXEL).unwrap();
    assert!(pixel.contains("fragment float4 FragmentMain("));
    assert!(pixel.contains("struct GlobalContext"));
    assert_eq!(pixel.matches("mx_diffuse_brdf_reflection(L, V").count(), 1, "{pixel}");
    assert_eq!(pixel.matches("mx_diffuse_brdf_indirect(V").count(), 1);
}

#[test]
fn msl_constant_uses_float_vectors() {
    let doc = document(constant_gray());
    let shader = generate(&doc, "NG_gray", msl::TARGET, no_lights()).unwrap();
    let pixel = shader.source_code(PIXEL).unwrap();
    assert!(pixel.contains("float4(float3(0.500000, 0.500000, 0.500000), 1.0)"), "{pixel}");
    assert!(!pixel.contains("vec3"));
}

#[test]
fn osl_emits_a_single_shader_with_parameters() {
    let doc = document(diffuse_surface());
    let shader = generate(&doc, "NG_plastic", osl::TARGET, GenOptions::default()).unwrap();
    assert_eq!(shader.stages().len(), 1);

    let source = shader.source_code(PIXEL).unwrap();
    assert!(source.contains("shader NG_plastic"), "{source}");
    assert!(source.contains("#define BSDF closure color"));
    assert!(source.contains("color diffuse_color = color(0.800000, 0.200000, 0.200000)"));
    assert!(source.contains("output surfaceshader out = 0"));
    assert!(source.contains("mx_diffuse_brdf("));
    assert!(!source.contains("_reflection("));
}

#[test]
fn targets_agree_on_published_inputs() {
    let doc = document(diffuse_surface());
    let mut published = Vec::new();
    for target in ["genglsl", "genmsl", "genosl"] {
        let shader = generate(&doc, "NG_plastic", target, GenOptions::default()).unwrap();
        let mut names: Vec<_> = shader
            .graph
            .input_sockets()
            .iter()
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        published.push(names);
    }
    assert_eq!(published[0], published[1]);
    assert_eq!(published[0], published[2]);
    assert!(published[0].iter().any(|n| n == "diffuse_color"));
}
