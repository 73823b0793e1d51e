//! Stage definition.

use crate::sandbox::ModuleRef;
use crate::syscall::Preopen;
use std::collections::BTreeMap;

/// One module invocation within a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineStage {
    pub name: String,
    pub module: ModuleRef,
    /// argv; `args[0]` is the program name.
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub preopens: Vec<Preopen>,
}

impl PipelineStage {
    pub fn new(name: impl Into<String>, module: ModuleRef) -> Self {
        Self {
            name: name.into(),
            module,
            args: Vec::new(),
            env: BTreeMap::new(),
            preopens: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn preopen(mut self, preopen: Preopen) -> Self {
        self.preopens.push(preopen);
        self
    }

    /// Transcript line: `$ argv joined by spaces`.
    pub fn command_line(&self) -> String {
        format!("$ {}", self.args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_command_line() {
        let stage = PipelineStage::new("link", ModuleRef::VfsPath("/ld.wasm".into()))
            .args(["wasm-ld", "/code.wasm", "-o", "/program.wasm"])
            .env("A", "1")
            .preopen(Preopen::root());

        assert_eq!(stage.command_line(), "$ wasm-ld /code.wasm -o /program.wasm");
        assert_eq!(stage.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(stage.preopens, vec![Preopen::root()]);
    }
}
