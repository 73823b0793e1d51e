use crate::vfs::path::{normalize, with_extension};
use playbox_shared::errors::{PlayboxError, PlayboxResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Paths and command templates for the compile → link → run pipeline.
///
/// Every field has a default, so a config file only needs the keys it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaygroundOptions {
    /// Where the user's source is written. The compiler's object lands
    /// beside it, see [`PlaygroundOptions::object_path`].
    pub source_path: String,
    /// Linker output, the module that runs or gets exported.
    pub program_path: String,
    pub compiler_program: String,
    pub linker_program: String,
    /// Environment variable naming the compiler's library root.
    pub library_env: String,
    pub library_root: String,
    /// Objects every program is linked against.
    pub runtime_objects: Vec<String>,
    /// Empty files created before each run.
    pub seed_files: Vec<String>,
}

impl Default for PlaygroundOptions {
    fn default() -> Self {
        Self {
            source_path: "/code.cr".into(),
            program_path: "/program.wasm".into(),
            compiler_program: "crystal".into(),
            linker_program: "wasm-ld".into(),
            library_env: "CRYSTAL_PATH".into(),
            library_root: "/crystal/src".into(),
            runtime_objects: vec![
                "/lib/wasm32-wasi/crt1.o".into(),
                "/lib/wasm32-wasi/libc.a".into(),
            ],
            seed_files: vec!["/dev/zero".into()],
        }
    }
}

impl PlaygroundOptions {
    /// Compiler output and linker input: `source_path` with a `.wasm`
    /// extension, which is where `crystal build` writes without `-o`.
    pub fn object_path(&self) -> String {
        with_extension(&self.source_path, "wasm")
    }

    /// Load from a JSON file and validate.
    pub fn from_file(path: &Path) -> PlayboxResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let options: Self = serde_json::from_str(&text)?;
        options.sanitize()
    }

    /// Normalize every virtual path and reject unusable values.
    pub fn sanitize(mut self) -> PlayboxResult<Self> {
        let check = |name: &str, path: &str| {
            normalize(path).map_err(|_| {
                PlayboxError::Config(format!("{} must be an absolute path, got '{}'", name, path))
            })
        };

        self.source_path = check("source_path", &self.source_path)?;
        self.program_path = check("program_path", &self.program_path)?;
        self.library_root = check("library_root", &self.library_root)?;
        for path in self.runtime_objects.iter_mut() {
            *path = check("runtime_objects", path)?;
        }
        for path in self.seed_files.iter_mut() {
            *path = check("seed_files", path)?;
        }

        for (name, value) in [
            ("compiler_program", &self.compiler_program),
            ("linker_program", &self.linker_program),
            ("library_env", &self.library_env),
        ] {
            if value.trim().is_empty() {
                return Err(PlayboxError::Config(format!("{} must not be empty", name)));
            }
        }
        if self.source_path == self.program_path || self.object_path() == self.program_path {
            return Err(PlayboxError::Config(
                "program_path must differ from source_path and object_path".into(),
            ));
        }
        Ok(self)
    }
}
