//! Text object format shared by the compiler and linker.

pub(super) const MAGIC: &str = ";; playbox-object v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Op {
    Write(Vec<u8>),
    Exit(i32),
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ObjectFile {
    pub source: Option<String>,
    pub ops: Vec<Op>,
}

impl ObjectFile {
    pub fn new(source: &str, ops: Vec<Op>) -> Self {
        Self {
            source: Some(source.to_string()),
            ops,
        }
    }

    /// Merge adjacent writes into one.
    pub fn fold_writes(&mut self) {
        let mut folded: Vec<Op> = Vec::with_capacity(self.ops.len());
        for op in self.ops.drain(..) {
            if let (Some(Op::Write(prev)), Op::Write(next)) = (folded.last_mut(), &op) {
                prev.extend_from_slice(next);
                continue;
            }
            folded.push(op);
        }
        self.ops = folded;
    }

    pub fn render(&self) -> String {
        let mut out = String::from(MAGIC);
        out.push('\n');
        if let Some(source) = &self.source {
            out.push_str(&format!(";; source {}\n", source));
        }
        for op in &self.ops {
            match op {
                Op::Write(bytes) => out.push_str(&format!("write {}\n", hex::encode(bytes))),
                Op::Exit(code) => out.push_str(&format!("exit {}\n", code)),
                Op::Abort => out.push_str("abort\n"),
            }
        }
        out
    }

    /// `None` if `data` is not an object file at all.
    pub fn parse(data: &[u8]) -> Option<Result<Self, String>> {
        let text = std::str::from_utf8(data).ok()?;
        let mut lines = text.lines();
        if lines.next()? != MAGIC {
            return None;
        }

        let mut object = ObjectFile {
            source: None,
            ops: Vec::new(),
        };
        for (n, line) in lines.enumerate() {
            let line = line.trim();
            if let Some(source) = line.strip_prefix(";; source ") {
                object.source = Some(source.to_string());
                continue;
            }
            if line.is_empty() || line.starts_with(";;") {
                continue;
            }
            let (op, arg) = line.split_once(' ').unwrap_or((line, ""));
            let parsed = match op {
                "write" => hex::decode(arg).map(Op::Write).map_err(|e| e.to_string()),
                "exit" => arg.parse().map(Op::Exit).map_err(|e| format!("{}", e)),
                "abort" => Ok(Op::Abort),
                other => Err(format!("unknown operation '{}'", other)),
            };
            match parsed {
                Ok(op) => object.ops.push(op),
                Err(e) => return Some(Err(format!("line {}: {}", n + 2, e))),
            }
        }
        Some(Ok(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_and_parse() {
        let object = ObjectFile::new("/code.cr", vec![Op::Write(b"1".to_vec()), Op::Exit(2), Op::Abort]);
        let text = object.render();

        assert_eq!(
            text,
            ";; playbox-object v1\n;; source /code.cr\nwrite 31\nexit 2\nabort\n"
        );
        assert_eq!(ObjectFile::parse(text.as_bytes()), Some(Ok(object)));
    }

    #[test]
    fn test_non_objects_are_not_parsed() {
        assert_eq!(ObjectFile::parse(b""), None);
        assert_eq!(ObjectFile::parse(b"\x00asm"), None);
        assert!(matches!(
            ObjectFile::parse(b";; playbox-object v1\njump 3\n"),
            Some(Err(msg)) if msg.contains("line 2")
        ));
    }

    #[test]
    fn test_fold_writes() {
        let mut object = ObjectFile::new(
            "/code.cr",
            vec![
                Op::Write(b"a".to_vec()),
                Op::Write(b"b".to_vec()),
                Op::Exit(0),
                Op::Write(b"c".to_vec()),
            ],
        );
        object.fold_writes();
        assert_eq!(
            object.ops,
            vec![Op::Write(b"ab".to_vec()), Op::Exit(0), Op::Write(b"c".to_vec())]
        );
    }
}
