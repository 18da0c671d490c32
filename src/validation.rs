//! GLSL validation using the naga library.

use anyhow::{Context, Result, anyhow};

use crate::genshader::{PIXEL, Shader, VERTEX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlslShaderStage {
    Vertex,
    Fragment,
}

impl GlslShaderStage {
    /// Stage of a generated hardware shader stage name.
    pub fn for_stage_name(name: &str) -> Option<Self> {
        match name {
            VERTEX => Some(GlslShaderStage::Vertex),
            PIXEL => Some(GlslShaderStage::Fragment),
            _ => None,
        }
    }
}

/// Parse and validate GLSL source.
///
/// # Returns
/// The parsed naga Module on success, or an error carrying the numbered
/// source on failure.
pub fn validate_glsl(source: &str, stage: GlslShaderStage) -> Result<naga::Module> {
    let shader_stage = match stage {
        GlslShaderStage::Vertex => naga::ShaderStage::Vertex,
        GlslShaderStage::Fragment => naga::ShaderStage::Fragment,
    };

    let mut parser = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options {
        stage: shader_stage,
        defines: Default::default(),
    };

    let module = parser
        .parse(&options, source)
        .map_err(|e| anyhow!("GLSL parse failed: {e:?}\n{}", numbered_source(source)))?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| anyhow!("GLSL validation failed: {e:?}\n{}", numbered_source(source)))?;

    Ok(module)
}

/// Validate GLSL and name what produced it in the error.
pub fn validate_glsl_with_context(source: &str, stage: GlslShaderStage, context: &str) -> Result<naga::Module> {
    validate_glsl(source, stage).with_context(|| format!("{context} generated invalid GLSL"))
}

/// Validate every stage of a generated GLSL shader.
pub fn validate_shader(shader: &Shader) -> Result<()> {
    for stage in shader.stages() {
        let Some(kind) = GlslShaderStage::for_stage_name(&stage.name) else {
            continue;
        };
        validate_glsl_with_context(
            stage.source_code(),
            kind,
            &format!("stage '{}' of shader '{}'", stage.name, shader.name),
        )?;
    }
    Ok(())
}

fn numbered_source(source: &str) -> String {
    let mut output = String::from("---\n");
    for (line_num, line) in source.lines().enumerate() {
        output.push_str(&format!("{:4} | {}\n", line_num + 1, line));
    }
    output.push_str("---\n");
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_glsl_fragment() {
        let source = r#"#version 450
layout(location = 0) in vec3 normalWorld;
layout(location = 0) out vec4 out1;

void mx_diffuse(vec3 color, float weight, out vec3 result)
{
    result = color * weight;
}

void main()
{
    vec3 diffuse_out = vec3(0.0);
    mx_diffuse(vec3(0.5, 0.5, 0.5), 1.0, diffuse_out);
    out1 = vec4(diffuse_out * normalize(normalWorld), 1.0);
}
"#;
        let result = validate_glsl(source, GlslShaderStage::Fragment);
        assert!(result.is_ok(), "expected valid GLSL, got: {:?}", result.err());
    }

    #[test]
    fn test_valid_glsl_vertex() {
        let source = r#"#version 450
layout(location = 0) in vec3 i_position;

void main()
{
    gl_Position = vec4(i_position, 1.0);
}
"#;
        assert!(validate_glsl(source, GlslShaderStage::Vertex).is_ok());
    }

    #[test]
    fn test_invalid_glsl_reports_numbered_source() {
        let source = "#version 450\nvoid main()\n{\n    vec3 x = undefined_symbol;\n}\n";
        let err = validate_glsl(source, GlslShaderStage::Fragment).unwrap_err();
        let text = format!("{err}");
        assert!(text.contains("   4 |"), "missing numbered source in: {text}");
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(GlslShaderStage::for_stage_name("vertex"), Some(GlslShaderStage::Vertex));
        assert_eq!(GlslShaderStage::for_stage_name("pixel"), Some(GlslShaderStage::Fragment));
        assert_eq!(GlslShaderStage::for_stage_name("compute"), None);
    }
}
