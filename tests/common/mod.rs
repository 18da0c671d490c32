#![allow(dead_code)]

use node_forge_shadergen::document::io;
use node_forge_shadergen::genshader::osl;
use node_forge_shadergen::{
    Document, GenContext, GenOptions, ImplementationRegistry, Result, Shader, TypeSystem, generator_for,
};

/// Parse a document from JSON and import the bundled standard library.
pub fn document(desc: serde_json::Value) -> Document {
    let mut doc = io::document_from_json(&desc.to_string()).expect("document json");
    let stdlib = io::load_standard_library().expect("standard library");
    doc.import_library(&stdlib).expect("import standard library");
    doc
}

/// Generate `element` (a top-level path such as `NG_gray`) for `target`
/// with a fresh generator and context.
pub fn generate(doc: &Document, element: &str, target: &str, options: GenOptions) -> Result<Shader> {
    let generator = generator_for(target).expect("known target");
    let types = TypeSystem::standard();
    let registry = ImplementationRegistry::for_generator(generator.as_ref());
    let lights = options.hw_max_active_light_sources;
    let mut ctx = GenContext::new(generator.as_ref(), &types, &registry).with_options(options);
    if lights > 0 && target != osl::TARGET {
        ctx.bind_light_shader(doc, "ND_point_light", 1)?;
    }
    let el = doc.child(doc.root(), element).expect("element exists");
    ctx.generate(element, doc, el)
}

pub fn no_lights() -> GenOptions {
    GenOptions {
        hw_max_active_light_sources: 0,
        ..GenOptions::default()
    }
}

/// Last line of `source` that ends a statement.
pub fn last_statement(source: &str) -> &str {
    source
        .lines()
        .map(str::trim)
        .filter(|l| l.ends_with(';'))
        .last()
        .unwrap_or("")
}

pub fn constant_gray() -> serde_json::Value {
    serde_json::json!({
        "nodeGraphs": [{
            "name": "NG_gray",
            "nodes": [{
                "name": "gray",
                "category": "constant",
                "type": "color3",
                "inputs": [{ "name": "value", "type": "color3", "value": "0.5, 0.5, 0.5" }]
            }],
            "outputs": [{ "name": "out", "type": "color3", "nodename": "gray" }]
        }]
    })
}

pub fn diffuse_surface() -> serde_json::Value {
    serde_json::json!({
        "nodeGraphs": [{
            "name": "NG_plastic",
            "nodes": [
                {
                    "name": "diffuse",
                    "category": "diffuse_brdf",
                    "type": "BSDF",
                    "inputs": [{ "name": "color", "type": "color3", "value": "0.8, 0.2, 0.2" }]
                },
                {
                    "name": "surf",
                    "category": "surface",
                    "type": "surfaceshader",
                    "inputs": [{ "name": "bsdf", "type": "BSDF", "nodename": "diffuse" }]
                }
            ],
            "outputs": [{ "name": "out", "type": "surfaceshader", "nodename": "surf" }]
        }]
    })
}
