use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use log::{info, warn};
use node_forge_shadergen::document::{self, Document, ElementId, ElementKind, attr, io};
use node_forge_shadergen::genshader::{
    GenContext, GenOptions, ImplementationRegistry, Shader, ShaderGenerator, generator_for, glsl,
};
use node_forge_shadergen::types::TypeSystem;
use node_forge_shadergen::validation;

/// Lights bound for hardware targets, with the id used in `LightData.type`.
const STANDARD_LIGHTS: &[(&str, u32)] = &[("ND_point_light", 1), ("ND_directional_light", 2)];

#[derive(Debug, Default, Clone)]
struct Cli {
    document: Option<PathBuf>,
    libraries: Vec<PathBuf>,
    element: Option<String>,
    target: Option<String>,
    options: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
    output_dir: Option<PathBuf>,
    flatten: bool,
    dot: bool,
    validate: bool,
}

const USAGE: &str = "supported: --document <doc.json>, --library <lib.json>, --element <graph[/output]>, \
--target <genglsl|genmsl|genosl>, --options <options.json>, --search-path <dir>, --output-dir <dir>, \
--flatten, --dot, --validate";

fn flag_value(args: &[String], i: usize) -> Result<String> {
    args.get(i + 1)
        .cloned()
        .ok_or_else(|| anyhow!("missing value for {}", args[i]))
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--document" => {
                cli.document = Some(PathBuf::from(flag_value(args, i)?));
                i += 2;
            }
            "--library" => {
                cli.libraries.push(PathBuf::from(flag_value(args, i)?));
                i += 2;
            }
            "--element" => {
                cli.element = Some(flag_value(args, i)?);
                i += 2;
            }
            "--target" => {
                cli.target = Some(flag_value(args, i)?);
                i += 2;
            }
            "--options" => {
                cli.options = Some(PathBuf::from(flag_value(args, i)?));
                i += 2;
            }
            "--search-path" => {
                cli.search_paths.push(PathBuf::from(flag_value(args, i)?));
                i += 2;
            }
            "--outputdir" | "--output-dir" => {
                cli.output_dir = Some(PathBuf::from(flag_value(args, i)?));
                i += 2;
            }
            "--flatten" => {
                cli.flatten = true;
                i += 1;
            }
            "--dot" => {
                cli.dot = true;
                i += 1;
            }
            "--validate" => {
                cli.validate = true;
                i += 1;
            }
            other => return Err(anyhow!("unknown argument: {other} ({USAGE})")),
        }
    }
    Ok(cli)
}

fn load_options(path: Option<&Path>) -> Result<GenOptions> {
    let Some(path) = path else {
        return Ok(GenOptions::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read --options file {}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| anyhow!("invalid options json in {}: {e}", path.display()))
}

/// Resolve `graph` or `graph/output` under the document root.
fn find_element(doc: &Document, path: &str) -> Result<ElementId> {
    let mut current = doc.root();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current = doc
            .child(current, part)
            .ok_or_else(|| anyhow!("element '{path}' not found (missing '{part}')"))?;
    }
    Ok(current)
}

/// Node graphs that are not the implementation of a nodedef.
fn material_graphs(doc: &Document) -> Vec<ElementId> {
    doc.node_graphs()
        .into_iter()
        .filter(|g| doc.attribute(*g, attr::NODE_DEF).is_none())
        .collect()
}

fn write_shader(shader: &Shader, generator: &dyn ShaderGenerator, output_dir: &Path) -> Result<()> {
    let ext = generator.syntax().source_file_extension;
    for stage in shader.stages() {
        let mut out = output_dir.to_path_buf();
        out.push(format!("{}.{}{ext}", shader.name, stage.name));
        std::fs::write(&out, stage.source_code())
            .map_err(|e| anyhow!("failed to write {}: {e}", out.display()))?;
        println!("[shadergen] saved: {}", out.display());
    }
    Ok(())
}

fn generate_one(
    ctx: &mut GenContext<'_>,
    doc: &Document,
    element: ElementId,
    cli: &Cli,
    output_dir: &Path,
) -> Result<()> {
    let generator = ctx.generator();
    let name = doc.name(element).to_string();
    if cli.dot && doc.kind(element) == ElementKind::NodeGraph {
        let dot = document::dot::as_string_dot(doc, element)?;
        let mut out = output_dir.to_path_buf();
        out.push(format!("{name}.dot"));
        std::fs::write(&out, dot).map_err(|e| anyhow!("failed to write {}: {e}", out.display()))?;
        println!("[shadergen] saved: {}", out.display());
    }
    let shader = ctx.generate(&name, doc, element)?;
    if cli.validate {
        if generator.target() == glsl::TARGET {
            if let Err(e) = validation::validate_shader(&shader) {
                warn!("[shadergen] validation failed for '{name}': {e:#}");
            } else {
                info!("[shadergen] '{name}' passed validation");
            }
        } else {
            warn!("[shadergen] --validate only checks {} output", glsl::TARGET);
        }
    }
    write_shader(&shader, generator, output_dir)
}

fn run(cli: Cli) -> Result<()> {
    let doc_path = cli
        .document
        .clone()
        .ok_or_else(|| anyhow!("--document is required ({USAGE})"))?;
    let target = cli.target.clone().unwrap_or_else(|| glsl::TARGET.to_string());
    let generator = generator_for(&target).ok_or_else(|| anyhow!("unknown target '{target}'"))?;
    let output_dir = cli.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&output_dir)
        .map_err(|e| anyhow!("failed to create {}: {e}", output_dir.display()))?;

    let mut doc = io::load_document(&doc_path)?;
    doc.import_library(&io::load_standard_library()?)?;
    for lib in &cli.libraries {
        doc.import_library(&io::load_document(lib)?)?;
    }

    let elements = match &cli.element {
        Some(path) => vec![find_element(&doc, path)?],
        None => material_graphs(&doc),
    };
    if elements.is_empty() {
        return Err(anyhow!("no node graphs to generate in {}", doc_path.display()));
    }
    if cli.flatten {
        for el in &elements {
            let graph = match doc.kind(*el) {
                ElementKind::NodeGraph => *el,
                _ => doc.parent(*el).unwrap_or(doc.root()),
            };
            document::flatten_subgraphs(&mut doc, graph, &target)?;
        }
    }

    let types = TypeSystem::standard();
    let registry = ImplementationRegistry::for_generator(generator.as_ref());
    let mut ctx = GenContext::new(generator.as_ref(), &types, &registry).with_options(load_options(cli.options.as_deref())?);
    for root in &cli.search_paths {
        ctx.search_path.add_root(root.clone());
    }
    for (node_def, id) in STANDARD_LIGHTS {
        let bindable = doc
            .node_def(node_def)
            .is_some_and(|def| doc.implementation_for(def, &target).is_some());
        if bindable {
            ctx.bind_light_shader(&doc, node_def, *id)?;
        }
    }

    let mut failures = 0;
    for el in &elements {
        if let Err(e) = generate_one(&mut ctx, &doc, *el, &cli, &output_dir) {
            failures += 1;
            match e.downcast_ref::<node_forge_shadergen::Error>() {
                Some(err) => warn!("[shadergen] {} failed ({}): {err}", doc.path(*el), err.kind()),
                None => warn!("[shadergen] {} failed: {e:#}", doc.path(*el)),
            }
        }
    }
    if failures == elements.len() {
        return Err(anyhow!("all {failures} shader(s) failed to generate"));
    }
    info!("[shadergen] generated {} of {} shader(s)", elements.len() - failures, elements.len());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&args)?;
    run(cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_flags_and_repeated_values() {
        let cli = parse_cli(&args(&[
            "--document", "doc.json", "--library", "a.json", "--library", "b.json", "--target", "genmsl",
            "--flatten", "--validate",
        ]))
        .unwrap();
        assert_eq!(cli.document, Some(PathBuf::from("doc.json")));
        assert_eq!(cli.libraries.len(), 2);
        assert_eq!(cli.target.as_deref(), Some("genmsl"));
        assert!(cli.flatten && cli.validate && !cli.dot);
    }

    #[test]
    fn missing_value_is_an_error() {
        let err = parse_cli(&args(&["--element"])).unwrap_err();
        assert!(err.to_string().contains("missing value for --element"));
        assert!(parse_cli(&args(&["--bogus"])).is_err());
    }
}
