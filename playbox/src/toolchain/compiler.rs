//! `crystal`: compiles a tiny line-oriented subset to object files.
//!
//! Supported statements, one per line:
//!
//! ```text
//! # comment
//! print 1          # integer or "string", no newline
//! puts "hi"        # with newline; bare `puts` prints one
//! exit 3           # bare `exit` is `exit 0`
//! abort            # raises SIGABRT
//! ```

use super::object::{ObjectFile, Op};
use super::{env_var, exists, fail, print, read_file, write_file};
use crate::sandbox::{ModuleError, NativeModule};
use crate::syscall::Syscalls;
use crate::vfs::path::with_extension;
use async_trait::async_trait;

pub const COMPILER_VERSION: &str = "1.9.2";
const DEFAULT_TARGET: &str = "wasm32-unknown-wasi";
const PATH_ENV: &str = "CRYSTAL_PATH";
const BUILTIN_PRELUDE: &str = "empty";

const USAGE: &str = "Usage: crystal [command] [switches] [program file] [--] [arguments]

Command:
    build                    build an executable
    tool format              format project, directories and/or files
    --version, -v            show version";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Int(i64),
    Str(String),
}

impl Value {
    fn text(&self) -> String {
        match self {
            Value::Int(n) => n.to_string(),
            Value::Str(s) => s.clone(),
        }
    }

    fn render(&self) -> String {
        match self {
            Value::Int(n) => n.to_string(),
            Value::Str(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('"');
                for c in s.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        c => out.push(c),
                    }
                }
                out.push('"');
                out
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Statement {
    Print(Value),
    Puts(Option<Value>),
    Exit(i32),
    Abort,
}

impl Statement {
    fn render(&self) -> String {
        match self {
            Statement::Print(v) => format!("print {}", v.render()),
            Statement::Puts(Some(v)) => format!("puts {}", v.render()),
            Statement::Puts(None) => "puts".to_string(),
            Statement::Exit(0) => "exit".to_string(),
            Statement::Exit(code) => format!("exit {}", code),
            Statement::Abort => "abort".to_string(),
        }
    }

    fn lower(&self) -> Op {
        match self {
            Statement::Print(v) => Op::Write(v.text().into_bytes()),
            Statement::Puts(v) => {
                let mut text = v.as_ref().map(Value::text).unwrap_or_default();
                text.push('\n');
                Op::Write(text.into_bytes())
            }
            Statement::Exit(code) => Op::Exit(*code),
            Statement::Abort => Op::Abort,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Blank,
    Comment(String),
    Statement(Statement),
}

#[derive(Debug, PartialEq, Eq)]
struct SyntaxError {
    line: usize,
    message: String,
}

fn parse_source(source: &str) -> Result<Vec<Line>, SyntaxError> {
    source
        .lines()
        .enumerate()
        .map(|(n, line)| {
            parse_line(line).map_err(|message| SyntaxError {
                line: n + 1,
                message,
            })
        })
        .collect()
}

fn parse_line(line: &str) -> Result<Line, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Line::Blank);
    }
    if line.starts_with('#') {
        return Ok(Line::Comment(line.to_string()));
    }

    let (keyword, rest) = match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    };
    let statement = match (keyword, rest) {
        ("print", "") => return Err("wrong number of arguments for 'print' (given 0, expected 1)".into()),
        ("print", arg) => Statement::Print(parse_value(arg)?),
        ("puts", "") => Statement::Puts(None),
        ("puts", arg) => Statement::Puts(Some(parse_value(arg)?)),
        ("exit", "") => Statement::Exit(0),
        ("exit", arg) => Statement::Exit(
            parse_int(arg)
                .and_then(|n| i32::try_from(n).ok())
                .ok_or_else(|| format!("expected an integer exit status, not '{}'", arg))?,
        ),
        ("abort", "") => Statement::Abort,
        ("abort", _) => return Err("wrong number of arguments for 'abort' (given 1, expected 0)".into()),
        (keyword, _) => return Err(format!("undefined method '{}'", keyword)),
    };
    Ok(Line::Statement(statement))
}

fn parse_int(text: &str) -> Option<i64> {
    if text.starts_with('_') || text.ends_with('_') {
        return None;
    }
    text.replace('_', "").parse().ok()
}

fn parse_value(text: &str) -> Result<Value, String> {
    if let Some(body) = text.strip_prefix('"') {
        return parse_string(body).map(Value::Str);
    }
    parse_int(text)
        .map(Value::Int)
        .ok_or_else(|| format!("expected an integer or string literal, not '{}'", text))
}

/// Parse the rest of a string literal after its opening quote.
fn parse_string(body: &str) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                let trailing = chars.as_str().trim();
                if !trailing.is_empty() {
                    return Err(format!("unexpected token: '{}'", trailing));
                }
                return Ok(out);
            }
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => return Err(format!("invalid escape sequence '\\{}'", other)),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err("unterminated string literal".into())
}

fn format_source(lines: &[Line]) -> String {
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    for line in lines {
        let rendered = match line {
            Line::Blank => {
                if out.last().is_none_or(|prev| prev.is_empty()) {
                    continue;
                }
                String::new()
            }
            Line::Comment(text) => text.clone(),
            Line::Statement(statement) => statement.render(),
        };
        out.push(rendered);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    if out.is_empty() {
        return String::new();
    }
    let mut text = out.join("\n");
    text.push('\n');
    text
}

#[derive(Debug, Default, PartialEq, Eq)]
struct BuildArgs {
    source: String,
    output: Option<String>,
    cross_compile: bool,
    release: bool,
    prelude: Option<String>,
    target: Option<String>,
}

impl BuildArgs {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut build = BuildArgs::default();
        let mut source = None;
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let mut value = |flag: &str| {
                iter.next()
                    .cloned()
                    .ok_or_else(|| format!("Error: missing argument for {}", flag))
            };
            match arg.as_str() {
                "--cross-compile" => build.cross_compile = true,
                "--release" => build.release = true,
                "--prelude" => build.prelude = Some(value("--prelude")?),
                "--target" => build.target = Some(value("--target")?),
                "-o" | "--output" => build.output = Some(value("-o")?),
                flag if flag.starts_with('-') => {
                    return Err(format!("Error: unknown option: {}", flag));
                }
                file => {
                    if source.replace(file.to_string()).is_some() {
                        return Err("Error: multiple source files are not supported".into());
                    }
                }
            }
        }
        build.source = source.ok_or("Error: no source file given")?;
        Ok(build)
    }

    fn object_path(&self) -> String {
        if let Some(output) = &self.output {
            return output.clone();
        }
        with_extension(&self.source, "wasm")
    }
}

/// Builtin `crystal` compiler.
#[derive(Debug, Default, Clone, Copy)]
pub struct Compiler;

impl Compiler {
    fn version(&self, sys: &mut dyn Syscalls) -> Result<(), ModuleError> {
        let text = format!(
            "Crystal {} [playbox]\n\nLLVM: none\nDefault target: {}\n",
            COMPILER_VERSION, DEFAULT_TARGET
        );
        print(sys, &text)
    }

    fn read_source(&self, sys: &mut dyn Syscalls, path: &str) -> Result<String, ModuleError> {
        let bytes = match read_file(sys, path) {
            Ok(bytes) => bytes,
            Err(_) => return Err(fail(sys, &format!("Error: file '{}' does not exist", path))),
        };
        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(_) => Err(fail(sys, &format!("Error: file '{}' is not valid UTF-8", path))),
        }
    }

    fn parse(&self, sys: &mut dyn Syscalls, path: &str, text: &str) -> Result<Vec<Line>, ModuleError> {
        parse_source(text).map_err(|e| {
            fail(
                sys,
                &format!("Syntax error in {}:{}: {}", path, e.line, e.message),
            )
        })
    }

    fn check_prelude(&self, sys: &mut dyn Syscalls, prelude: &str) -> Result<(), ModuleError> {
        if prelude == BUILTIN_PRELUDE {
            return Ok(());
        }
        let search = env_var(sys, PATH_ENV).unwrap_or_default().to_string();
        let found = search
            .split(':')
            .filter(|dir| !dir.is_empty())
            .any(|dir| exists(sys, &format!("{}/{}.cr", dir.trim_end_matches('/'), prelude)));
        if found {
            Ok(())
        } else {
            Err(fail(sys, &format!("Error: can't find file '{}'", prelude)))
        }
    }

    fn build(&self, sys: &mut dyn Syscalls, args: &[String]) -> Result<(), ModuleError> {
        let build = BuildArgs::parse(args).map_err(|e| fail(sys, &e))?;
        if !build.cross_compile {
            return Err(fail(
                sys,
                "Error: linking is not available here, use --cross-compile and link with wasm-ld",
            ));
        }
        if let Some(target) = build.target.as_deref()
            && target != DEFAULT_TARGET
        {
            return Err(fail(sys, &format!("Error: unsupported target: {}", target)));
        }
        self.check_prelude(sys, build.prelude.as_deref().unwrap_or("prelude"))?;

        let text = self.read_source(sys, &build.source)?;
        let lines = self.parse(sys, &build.source, &text)?;

        let ops = lines
            .iter()
            .filter_map(|line| match line {
                Line::Statement(statement) => Some(statement.lower()),
                _ => None,
            })
            .collect();
        let mut object = ObjectFile::new(&build.source, ops);
        if build.release {
            object.fold_writes();
        }

        let output = build.object_path();
        write_file(sys, &output, object.render().as_bytes())
            .map_err(|e| fail(sys, &format!("Error: can't write {}: {}", output, e)))?;
        tracing::debug!(source = %build.source, output = %output, release = build.release, "Compiled");
        Ok(())
    }

    fn format(&self, sys: &mut dyn Syscalls, args: &[String]) -> Result<(), ModuleError> {
        let [path] = args else {
            return Err(fail(sys, "Usage: crystal tool format <file>"));
        };
        let text = self.read_source(sys, path)?;
        let lines = self.parse(sys, path, &text)?;

        let formatted = format_source(&lines);
        if formatted != text {
            write_file(sys, path, formatted.as_bytes())
                .map_err(|e| fail(sys, &format!("Error: can't write {}: {}", path, e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl NativeModule for Compiler {
    fn name(&self) -> &str {
        "crystal"
    }

    async fn main(&self, sys: &mut dyn Syscalls) -> Result<(), ModuleError> {
        let args: Vec<String> = sys.args().iter().skip(1).cloned().collect();
        match args.first().map(String::as_str) {
            Some("--version" | "-v" | "version") => self.version(sys),
            Some("build") => self.build(sys, &args[1..]),
            Some("tool") if args.get(1).map(String::as_str) == Some("format") => {
                self.format(sys, &args[2..])
            }
            Some(other) => Err(fail(sys, &format!("Error: unknown command: {}\n\n{}", other, USAGE))),
            None => Err(fail(sys, USAGE)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_statements() {
        let lines = parse_source("# hi\n\nprint 1\nputs \"a\\n\"\nputs\nexit 2\nabort\n").unwrap();
        assert_eq!(
            lines,
            vec![
                Line::Comment("# hi".into()),
                Line::Blank,
                Line::Statement(Statement::Print(Value::Int(1))),
                Line::Statement(Statement::Puts(Some(Value::Str("a\n".into())))),
                Line::Statement(Statement::Puts(None)),
                Line::Statement(Statement::Exit(2)),
                Line::Statement(Statement::Abort),
            ]
        );
    }

    #[test]
    fn test_syntax_errors_carry_line_numbers() {
        let err = parse_source("print 1\nfoo bar\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.message, "undefined method 'foo'");

        assert!(parse_source("print \"open").is_err());
        assert!(parse_source("print").is_err());
        assert!(parse_source("exit x").is_err());
        assert!(parse_source("print \"a\" b").is_err());
    }

    #[test]
    fn test_format_normalizes_whitespace() {
        let lines = parse_source("  print   1  \n\n\n# note   \nexit   0\n\n").unwrap();
        assert_eq!(format_source(&lines), "print 1\n\n# note\nexit\n");
    }

    #[test]
    fn test_build_args() {
        let build = BuildArgs::parse(&strings(&[
            "/code.cr",
            "--cross-compile",
            "--prelude",
            "empty",
            "--release",
        ]))
        .unwrap();

        assert!(build.cross_compile && build.release);
        assert_eq!(build.prelude.as_deref(), Some("empty"));
        assert_eq!(build.object_path(), "/code.wasm");

        let named = BuildArgs::parse(&strings(&["/src/app", "-o", "/out.o"])).unwrap();
        assert_eq!(named.object_path(), "/out.o");
        let bare = BuildArgs::parse(&strings(&["/src/app"])).unwrap();
        assert_eq!(bare.object_path(), "/src/app.wasm");

        assert!(BuildArgs::parse(&strings(&["--bogus", "/code.cr"])).is_err());
        assert!(BuildArgs::parse(&strings(&["--cross-compile"])).is_err());
    }
}
