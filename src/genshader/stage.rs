//! Shader stages, their variable blocks and the finished [`Shader`].

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{Error, Result};
use crate::types::TypeDesc;
use crate::value::Value;

use super::graph::ShaderGraph;

pub const VERTEX: &str = "vertex";
pub const PIXEL: &str = "pixel";

/// A named, typed variable inside a [`VariableBlock`].
#[derive(Clone, Debug)]
pub struct ShaderPort {
    pub ty: TypeDesc,
    pub name: String,
    /// Identifier in the emitted code. Defaults to the name.
    pub variable: String,
    pub value: Option<Value>,
    /// Path of the document element this port was created for, if any.
    pub path: String,
    /// Set once a generator has written code for this port.
    pub emitted: bool,
}

/// Ordered ports keyed by unique name.
#[derive(Clone, Debug)]
pub struct VariableBlock {
    pub name: String,
    pub instance: String,
    ports: Vec<ShaderPort>,
    index: HashMap<String, usize>,
}

impl VariableBlock {
    pub fn new(name: &str, instance: &str) -> Self {
        VariableBlock {
            name: name.to_string(),
            instance: instance.to_string(),
            ports: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add a port, or return the existing one with the same name.
    pub fn add(&mut self, ty: &TypeDesc, name: &str, value: Option<Value>) -> &mut ShaderPort {
        let i = match self.index.get(name) {
            Some(i) => *i,
            None => {
                self.ports.push(ShaderPort {
                    ty: ty.clone(),
                    name: name.to_string(),
                    variable: name.to_string(),
                    value,
                    path: String::new(),
                    emitted: false,
                });
                self.index.insert(name.to_string(), self.ports.len() - 1);
                self.ports.len() - 1
            }
        };
        &mut self.ports[i]
    }

    pub fn find(&self, name: &str) -> Option<&ShaderPort> {
        self.index.get(name).map(|i| &self.ports[*i])
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut ShaderPort> {
        self.index.get(name).map(|i| &mut self.ports[*i])
    }

    pub fn ports(&self) -> &[ShaderPort] {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut [ShaderPort] {
        &mut self.ports
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Brackets {
    None,
    Braces,
    Parentheses,
    Squares,
}

impl Brackets {
    fn pair(self) -> (&'static str, &'static str) {
        match self {
            Brackets::None => ("", ""),
            Brackets::Braces => ("{", "}"),
            Brackets::Parentheses => ("(", ")"),
            Brackets::Squares => ("[", "]"),
        }
    }
}

/// One compilation unit of generated code.
///
/// Emission is append-only. A function recorded through
/// [`ShaderStage::add_function_definition`] is never written twice.
#[derive(Clone, Debug)]
pub struct ShaderStage {
    pub name: String,
    pub function_name: String,
    code: String,
    indentation: usize,
    scopes: Vec<Brackets>,
    includes: BTreeSet<String>,
    defined_functions: HashSet<u64>,
    uniforms: Vec<VariableBlock>,
    inputs: Vec<VariableBlock>,
    outputs: Vec<VariableBlock>,
    pub constants: VariableBlock,
}

const INDENT: &str = "    ";

impl ShaderStage {
    pub fn new(name: &str, function_name: &str) -> Self {
        ShaderStage {
            name: name.to_string(),
            function_name: function_name.to_string(),
            code: String::new(),
            indentation: 0,
            scopes: Vec::new(),
            includes: BTreeSet::new(),
            defined_functions: HashSet::new(),
            uniforms: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            constants: VariableBlock::new("Constants", ""),
        }
    }

    pub fn source_code(&self) -> &str {
        &self.code
    }

    pub(crate) fn set_source_code(&mut self, code: String) {
        self.code = code;
    }

    pub fn create_uniform_block(&mut self, name: &str, instance: &str) -> &mut VariableBlock {
        Self::create_block(&mut self.uniforms, name, instance)
    }

    pub fn create_input_block(&mut self, name: &str, instance: &str) -> &mut VariableBlock {
        Self::create_block(&mut self.inputs, name, instance)
    }

    pub fn create_output_block(&mut self, name: &str, instance: &str) -> &mut VariableBlock {
        Self::create_block(&mut self.outputs, name, instance)
    }

    fn create_block<'b>(blocks: &'b mut Vec<VariableBlock>, name: &str, instance: &str) -> &'b mut VariableBlock {
        let i = match blocks.iter().position(|b| b.name == name) {
            Some(i) => i,
            None => {
                blocks.push(VariableBlock::new(name, instance));
                blocks.len() - 1
            }
        };
        &mut blocks[i]
    }

    pub fn uniform_block(&self, name: &str) -> Option<&VariableBlock> {
        self.uniforms.iter().find(|b| b.name == name)
    }

    pub fn uniform_block_mut(&mut self, name: &str) -> Option<&mut VariableBlock> {
        self.uniforms.iter_mut().find(|b| b.name == name)
    }

    pub fn input_block(&self, name: &str) -> Option<&VariableBlock> {
        self.inputs.iter().find(|b| b.name == name)
    }

    pub fn input_block_mut(&mut self, name: &str) -> Option<&mut VariableBlock> {
        self.inputs.iter_mut().find(|b| b.name == name)
    }

    pub fn output_block(&self, name: &str) -> Option<&VariableBlock> {
        self.outputs.iter().find(|b| b.name == name)
    }

    pub fn output_block_mut(&mut self, name: &str) -> Option<&mut VariableBlock> {
        self.outputs.iter_mut().find(|b| b.name == name)
    }

    pub fn uniform_blocks(&self) -> &[VariableBlock] {
        &self.uniforms
    }

    pub fn input_blocks(&self) -> &[VariableBlock] {
        &self.inputs
    }

    pub fn output_blocks(&self) -> &[VariableBlock] {
        &self.outputs
    }

    /// All blocks of the stage, for renaming passes.
    pub(crate) fn blocks_mut(&mut self) -> impl Iterator<Item = &mut VariableBlock> {
        self.uniforms
            .iter_mut()
            .chain(self.inputs.iter_mut())
            .chain(self.outputs.iter_mut())
            .chain(std::iter::once(&mut self.constants))
    }

    pub fn begin_line(&mut self) {
        for _ in 0..self.indentation {
            self.code.push_str(INDENT);
        }
    }

    pub fn end_line(&mut self, semicolon: bool) {
        if semicolon {
            self.code.push(';');
        }
        self.code.push('\n');
    }

    pub fn emit_string(&mut self, s: &str) {
        self.code.push_str(s);
    }

    pub fn emit_line(&mut self, s: &str, semicolon: bool) {
        self.begin_line();
        self.code.push_str(s);
        self.end_line(semicolon);
    }

    pub fn emit_comment(&mut self, s: &str) {
        self.emit_line(&format!("// {s}"), false);
    }

    pub fn emit_empty_line(&mut self) {
        self.code.push('\n');
    }

    /// Emit multi-line text at the current indentation.
    pub fn emit_block(&mut self, text: &str) {
        for line in text.lines() {
            if line.trim().is_empty() {
                self.emit_empty_line();
            } else {
                self.emit_line(line, false);
            }
        }
    }

    pub fn begin_scope(&mut self, brackets: Brackets) {
        let (open, _) = brackets.pair();
        if !open.is_empty() {
            self.emit_line(open, false);
        }
        self.scopes.push(brackets);
        self.indentation += 1;
    }

    pub fn end_scope(&mut self, semicolon: bool) -> Result<()> {
        let brackets = self.scopes.pop().ok_or_else(|| {
            Error::generation(format!("unbalanced scope in stage '{}'", self.name))
        })?;
        self.indentation -= 1;
        let (_, close) = brackets.pair();
        if !close.is_empty() {
            self.emit_line(close, semicolon);
        }
        Ok(())
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Record an include; returns false when it was already emitted.
    pub fn add_include(&mut self, file: &str) -> bool {
        self.includes.insert(file.to_string())
    }

    /// Record a function by identity hash; returns false when already defined.
    pub fn add_function_definition(&mut self, hash: u64) -> bool {
        self.defined_functions.insert(hash)
    }

    pub fn is_function_defined(&self, hash: u64) -> bool {
        self.defined_functions.contains(&hash)
    }
}

/// The result of one `generate()` call. Owns the graph mirror and every stage.
#[derive(Debug)]
pub struct Shader {
    pub name: String,
    pub graph: ShaderGraph,
    stages: Vec<ShaderStage>,
}

impl Shader {
    pub(crate) fn new(name: &str, graph: ShaderGraph, stages: Vec<ShaderStage>) -> Self {
        Shader {
            name: name.to_string(),
            graph,
            stages,
        }
    }

    pub fn stages(&self) -> &[ShaderStage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&ShaderStage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn source_code(&self, stage: &str) -> Option<&str> {
        self.stage(stage).map(ShaderStage::source_code)
    }
}

/// Find a stage by name among a generator's working set.
pub fn stage_mut<'s>(stages: &'s mut [ShaderStage], name: &str) -> Option<&'s mut ShaderStage> {
    stages.iter_mut().find(|s| s.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeSystem;

    #[test]
    fn scopes_indent_and_balance() {
        let mut stage = ShaderStage::new(PIXEL, "main");
        stage.emit_line("void main()", false);
        stage.begin_scope(Brackets::Braces);
        stage.emit_line("float x = 1.0", true);
        stage.end_scope(false).unwrap();
        assert_eq!(stage.source_code(), "void main()\n{\n    float x = 1.0;\n}\n");
        assert!(stage.end_scope(false).is_err());
    }

    #[test]
    fn functions_are_recorded_once() {
        let mut stage = ShaderStage::new(PIXEL, "main");
        assert!(stage.add_function_definition(7));
        assert!(!stage.add_function_definition(7));
        assert!(stage.add_include("a.glsl"));
        assert!(!stage.add_include("a.glsl"));
    }

    #[test]
    fn blocks_keep_insertion_order_and_reuse_names() {
        let ts = TypeSystem::standard();
        let f = ts.get("float").unwrap();
        let mut stage = ShaderStage::new(PIXEL, "main");
        let block = stage.create_uniform_block("PublicUniforms", "u_pub");
        block.add(&f, "b", None);
        block.add(&f, "a", Some(Value::Float(1.0)));
        block.add(&f, "b", Some(Value::Float(2.0)));
        let names: Vec<_> = block.ports().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
        assert_eq!(block.find("b").unwrap().value, None);
    }
}
