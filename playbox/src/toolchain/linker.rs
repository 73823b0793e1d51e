//! `wasm-ld`: links object files into a WebAssembly text module.

use super::object::{ObjectFile, Op};
use super::{fail, read_file, write_file};
use crate::sandbox::{ModuleError, NativeModule};
use crate::syscall::{SIGABRT, Syscalls};
use crate::syscall::wasi::WASI_MODULE;
use async_trait::async_trait;
use std::fmt::Write as _;

/// Program data starts here; the first bytes hold the iovec.
const DATA_BASE: u32 = 1024;
const PAGE_SIZE: u32 = 65536;

/// Builtin `wasm-ld` linker.
#[derive(Debug, Default, Clone, Copy)]
pub struct Linker;

struct LinkArgs {
    inputs: Vec<String>,
    output: String,
}

impl LinkArgs {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut inputs = Vec::new();
        let mut output = None;
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-o" => {
                    output = Some(
                        iter.next()
                            .cloned()
                            .ok_or("wasm-ld: error: -o: missing argument")?,
                    )
                }
                flag if flag.starts_with('-') => {
                    return Err(format!("wasm-ld: error: unknown argument: {}", flag));
                }
                input => inputs.push(input.to_string()),
            }
        }
        if inputs.is_empty() {
            return Err("wasm-ld: error: no input files".into());
        }
        let output = output.ok_or("wasm-ld: error: no output file specified (use -o)")?;
        Ok(Self { inputs, output })
    }
}

/// Render the final module for `ops`.
fn emit_module(ops: &[Op]) -> String {
    let mut data = String::new();
    let mut body = String::new();
    let mut cursor = DATA_BASE;
    let uses_abort = ops.contains(&Op::Abort);

    for op in ops {
        match op {
            Op::Write(bytes) if bytes.is_empty() => {}
            Op::Write(bytes) => {
                let escaped: String = hex::encode(bytes)
                    .as_bytes()
                    .chunks(2)
                    .map(|pair| format!("\\{}", String::from_utf8_lossy(pair)))
                    .collect();
                let _ = writeln!(data, "  (data (i32.const {}) \"{}\")", cursor, escaped);
                let _ = writeln!(
                    body,
                    "    (call $write (i32.const {}) (i32.const {}))",
                    cursor,
                    bytes.len()
                );
                cursor += bytes.len() as u32;
            }
            Op::Exit(code) => {
                let _ = writeln!(body, "    (call $proc_exit (i32.const {}))", code);
            }
            Op::Abort => {
                let _ = writeln!(
                    body,
                    "    (drop (call $proc_raise (i32.const {})))\n    (unreachable)",
                    SIGABRT
                );
            }
        }
    }

    let pages = cursor.div_ceil(PAGE_SIZE).max(1);
    let mut module = String::from("(module\n");
    let _ = writeln!(
        module,
        "  (import \"{}\" \"fd_write\" (func $fd_write (param i32 i32 i32 i32) (result i32)))",
        WASI_MODULE
    );
    let _ = writeln!(
        module,
        "  (import \"{}\" \"proc_exit\" (func $proc_exit (param i32)))",
        WASI_MODULE
    );
    if uses_abort {
        let _ = writeln!(
            module,
            "  (import \"{}\" \"proc_raise\" (func $proc_raise (param i32) (result i32)))",
            WASI_MODULE
        );
    }
    let _ = writeln!(module, "  (memory (export \"memory\") {})", pages);
    module.push_str(&data);
    module.push_str(
        "  (func $write (param $ptr i32) (param $len i32)
    (i32.store (i32.const 0) (local.get $ptr))
    (i32.store (i32.const 4) (local.get $len))
    (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8))))
",
    );
    module.push_str("  (func (export \"_start\")\n");
    module.push_str(&body);
    module.push_str("    (call $proc_exit (i32.const 0))))\n");
    module
}

impl Linker {
    fn link(&self, sys: &mut dyn Syscalls, args: &[String]) -> Result<(), ModuleError> {
        let link = LinkArgs::parse(args).map_err(|e| fail(sys, &e))?;

        let mut ops = Vec::new();
        let mut has_program = false;
        for input in &link.inputs {
            let bytes = match read_file(sys, input) {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Err(fail(
                        sys,
                        &format!("wasm-ld: error: cannot open {}: {}", input, e),
                    ));
                }
            };
            match ObjectFile::parse(&bytes) {
                Some(Ok(object)) => {
                    has_program = true;
                    ops.extend(object.ops);
                }
                Some(Err(e)) => {
                    return Err(fail(sys, &format!("wasm-ld: error: {}: {}", input, e)));
                }
                // Runtime archives only need to be present.
                None => {}
            }
        }
        if !has_program {
            return Err(fail(
                sys,
                "wasm-ld: error: entry symbol not defined (pass --no-entry to suppress): _start",
            ));
        }

        let module = emit_module(&ops);
        write_file(sys, &link.output, module.as_bytes()).map_err(|e| {
            fail(
                sys,
                &format!("wasm-ld: error: cannot write {}: {}", link.output, e),
            )
        })?;
        tracing::debug!(output = %link.output, inputs = link.inputs.len(), "Linked");
        Ok(())
    }
}

#[async_trait]
impl NativeModule for Linker {
    fn name(&self) -> &str {
        "wasm-ld"
    }

    async fn main(&self, sys: &mut dyn Syscalls) -> Result<(), ModuleError> {
        let args: Vec<String> = sys.args().iter().skip(1).cloned().collect();
        self.link(sys, &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_module_layout() {
        let wat = emit_module(&[Op::Write(b"1\n".to_vec()), Op::Exit(3)]);

        assert!(wat.contains("(data (i32.const 1024) \"\\31\\0a\")"));
        assert!(wat.contains("(call $write (i32.const 1024) (i32.const 2))"));
        assert!(wat.contains("(call $proc_exit (i32.const 3))"));
        assert!(!wat.contains("proc_raise"));
        assert!(wat.contains("(memory (export \"memory\") 1)"));
    }

    #[test]
    fn test_abort_imports_proc_raise() {
        let wat = emit_module(&[Op::Abort]);
        assert!(wat.contains("\"proc_raise\""));
        assert!(wat.contains("(call $proc_raise (i32.const 6))"));
    }

    #[test]
    fn test_emitted_module_compiles() {
        let wat = emit_module(&[Op::Write(b"hi".to_vec()), Op::Abort, Op::Exit(1)]);
        let engine = wasmtime::Engine::default();
        assert!(wasmtime::Module::new(&engine, wat.as_bytes()).is_ok());
    }

    #[test]
    fn test_link_args() {
        let args: Vec<String> = ["/code.wasm", "-o", "/program.wasm", "/lib/crt1.o"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let link = LinkArgs::parse(&args).unwrap();
        assert_eq!(link.inputs, vec!["/code.wasm", "/lib/crt1.o"]);
        assert_eq!(link.output, "/program.wasm");

        assert!(LinkArgs::parse(&["/code.wasm".to_string()]).is_err());
        assert!(LinkArgs::parse(&[]).is_err());
    }
}
