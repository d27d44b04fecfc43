//! Input, output, and error plumbing for the command runner.
//!
//! Input is a stack: the base line source (terminal or host-supplied
//! stream) with sourced scripts pushed on top; EOF pops. Output is a
//! stack too: stdout (or a capture buffer) with redirect files pushed for
//! the duration of one command. The error sink decorates the first error
//! of a command with the script call chain.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::rc::Rc;

use crate::tokenizer::{push_line, LineStep};

/// One stacked script position, for error context.
#[derive(Debug, Clone)]
pub struct LineInfo {
    pub path: String,
    pub line: usize,
}

/// Shared view of the active script stack.
pub type ScriptContext = Rc<RefCell<Vec<LineInfo>>>;

/// Where the next physical line comes from.
pub trait LineSource {
    /// `Ok(None)` at end of input.
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Line source over any buffered reader.
pub struct ReaderSource<R: BufRead> {
    reader: R,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for ReaderSource<R> {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }
}

struct ScriptFrame {
    reader: BufReader<File>,
}

/// Base input plus a stack of sourced scripts.
pub struct InputStack {
    base: Box<dyn LineSource>,
    base_done: bool,
    scripts: Vec<ScriptFrame>,
    script_context: ScriptContext,
}

impl InputStack {
    pub fn new(base: Box<dyn LineSource>, script_context: ScriptContext) -> Self {
        Self {
            base,
            base_done: false,
            scripts: Vec::new(),
            script_context,
        }
    }

    /// Push a script; reports open failures to the error sink.
    pub fn start_script(&mut self, path: &str, error: &mut ErrorSink) -> bool {
        match File::open(path) {
            Ok(file) => {
                self.scripts.push(ScriptFrame {
                    reader: BufReader::new(file),
                });
                self.script_context.borrow_mut().push(LineInfo {
                    path: path.to_string(),
                    line: 0,
                });
                true
            }
            Err(cause) => {
                error.emit(&format!("Failed to open script \"{}\".\n{}\n", path, cause));
                false
            }
        }
    }

    pub fn terminate_all_scripts(&mut self) {
        self.scripts.clear();
        self.script_context.borrow_mut().clear();
    }

    pub fn is_in_script(&self) -> bool {
        !self.scripts.is_empty()
    }

    /// No further input anywhere.
    pub fn is_done(&self) -> bool {
        self.base_done && self.scripts.is_empty()
    }

    /// Read the next statement's tokens. An empty vector means the
    /// current source ran out; check `is_done` to tell a finished script
    /// from the end of all input.
    pub fn get_tokens(&mut self) -> io::Result<Vec<String>> {
        let mut tokens = Vec::new();
        loop {
            let line = if let Some(frame) = self.scripts.last_mut() {
                let mut text = String::new();
                if frame.reader.read_line(&mut text)? == 0 {
                    self.scripts.pop();
                    self.script_context.borrow_mut().pop();
                    return Ok(tokens);
                }
                if let Some(info) = self.script_context.borrow_mut().last_mut() {
                    info.line += 1;
                }
                text
            } else {
                match self.base.read_line()? {
                    Some(text) => text,
                    None => {
                        self.base_done = true;
                        return Ok(tokens);
                    }
                }
            };
            if push_line(&mut tokens, &line) == LineStep::Done {
                return Ok(tokens);
            }
        }
    }
}

/// Stdout (or a capture buffer) with redirect targets pushed on top.
pub struct OutputStack {
    base: Box<dyn Write>,
    targets: Vec<(String, File)>,
}

impl OutputStack {
    pub fn new(base: Box<dyn Write>) -> Self {
        Self {
            base,
            targets: Vec::new(),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn push_target(&mut self, path: &str) -> io::Result<()> {
        let file = File::create(path)?;
        self.targets.push((path.to_string(), file));
        Ok(())
    }

    /// Close the top redirect target, returning its path.
    pub fn pop_target(&mut self) -> Option<String> {
        self.targets.pop().map(|(path, _)| path)
    }

    pub fn is_redirected(&self) -> bool {
        !self.targets.is_empty()
    }
}

impl Write for OutputStack {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.targets.last_mut() {
            Some((_, file)) => file.write(buf),
            None => self.base.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.targets.last_mut() {
            Some((_, file)) => file.flush(),
            None => self.base.flush(),
        }
    }
}

/// Error sink; the first error of each command is prefixed with the
/// script call chain that produced it.
pub struct ErrorSink {
    sink: Box<dyn Write>,
    script_context: ScriptContext,
    context_write_pending: bool,
}

impl ErrorSink {
    pub fn new(sink: Box<dyn Write>, script_context: ScriptContext) -> Self {
        Self {
            sink,
            script_context,
            context_write_pending: false,
        }
    }

    pub fn stderr(script_context: ScriptContext) -> Self {
        Self::new(Box::new(io::stderr()), script_context)
    }

    /// Arm the context prefix for the next error of this command.
    pub fn set_context_write_pending(&mut self) {
        self.context_write_pending = true;
    }

    fn flush_pending_context(&mut self) {
        if !self.context_write_pending {
            return;
        }
        self.context_write_pending = false;
        let frames = self.script_context.borrow();
        let mut frames_newest_first = frames.iter().rev();
        if let Some(newest) = frames_newest_first.next() {
            write!(
                self.sink,
                "Error at line {} of {}",
                newest.line, newest.path
            )
            .ok();
            for caller in frames_newest_first {
                write!(
                    self.sink,
                    "\n called from line {} of {}",
                    caller.line, caller.path
                )
                .ok();
            }
            writeln!(self.sink).ok();
        }
    }

    /// Report one error message; a trailing newline is the caller's.
    pub fn emit(&mut self, message: &str) {
        self.flush_pending_context();
        write!(self.sink, "{}", message).ok();
    }

    pub fn emit_line(&mut self, message: &str) {
        self.flush_pending_context();
        writeln!(self.sink, "{}", message).ok();
    }
}

/// Hex dump in the style operators expect from a process-image tool:
/// 8-byte little-endian words, 0x20 bytes per row, an offset header once
/// the image is longer than one row, and optionally the ASCII rendering
/// of each row.
pub fn hex_dump(
    out: &mut dyn Write,
    image: &[u8],
    show_trailing_ascii: bool,
) -> io::Result<()> {
    const ROW: usize = 0x20;
    const WORD: usize = 8;

    let header_width = if image.len() > ROW {
        let mut width = 1;
        let mut limit = 0x10;
        while image.len() > limit {
            width += 1;
            limit <<= 4;
        }
        width
    } else {
        0
    };

    let mut offset = 0;
    while offset < image.len() {
        if header_width != 0 {
            write!(out, "{:>width$x}: ", offset, width = header_width)?;
        }
        let row_end = (offset + ROW).min(image.len());
        let mut column = offset;
        while column < row_end {
            let word_end = (column + WORD).min(row_end);
            let mut word = [0u8; WORD];
            word[..word_end - column].copy_from_slice(&image[column..word_end]);
            write!(out, "{:016x}", u64::from_le_bytes(word))?;
            column = word_end;
            if column < row_end {
                write!(out, " ")?;
            }
        }
        if show_trailing_ascii {
            write!(out, "   ")?;
            for &byte in &image[offset..row_end] {
                let c = byte as char;
                write!(out, "{}", if (' '..='~').contains(&c) { c } else { '.' })?;
            }
        }
        writeln!(out)?;
        offset = row_end;
    }
    Ok(())
}

/// Escape bytes so the output is all printable ASCII; not reversible.
pub fn escaped_ascii(out: &mut dyn Write, bytes: &[u8]) -> io::Result<()> {
    for &byte in bytes {
        let c = byte as char;
        if (' '..='~').contains(&c) || c == '\t' || c == '\r' || c == '\n' {
            write!(out, "{}", c)?;
        } else {
            write!(out, "\\x{:02x}", byte)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn input_from(text: &str) -> InputStack {
        let context: ScriptContext = Rc::new(RefCell::new(Vec::new()));
        InputStack::new(
            Box::new(ReaderSource::new(Cursor::new(text.to_string()))),
            context,
        )
    }

    #[test]
    fn test_get_tokens_statement_per_call() {
        let mut input = input_from("count free\nlist leaked /size 20\n");
        assert_eq!(input.get_tokens().unwrap(), vec!["count", "free"]);
        assert_eq!(
            input.get_tokens().unwrap(),
            vec!["list", "leaked", "/size", "20"]
        );
        assert!(input.get_tokens().unwrap().is_empty());
        assert!(input.is_done());
    }

    #[test]
    fn test_continuation_spans_physical_lines() {
        let mut input = input_from("count \\\nfree\n");
        assert_eq!(input.get_tokens().unwrap(), vec!["count", "free"]);
    }

    #[test]
    fn test_error_sink_prefixes_script_context() {
        let context: ScriptContext = Rc::new(RefCell::new(vec![
            LineInfo {
                path: "outer.hsc".to_string(),
                line: 3,
            },
            LineInfo {
                path: "inner.hsc".to_string(),
                line: 7,
            },
        ]));
        let buffer: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        struct Capture(Rc<RefCell<Vec<u8>>>);
        impl Write for Capture {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut sink = ErrorSink::new(Box::new(Capture(buffer.clone())), context);
        sink.set_context_write_pending();
        sink.emit("boom\n");
        sink.emit("again\n");
        let text = String::from_utf8(buffer.borrow().clone()).unwrap();
        assert_eq!(
            text,
            "Error at line 7 of inner.hsc\n called from line 3 of outer.hsc\nboom\nagain\n"
        );
    }

    #[test]
    fn test_hex_dump_small_image_has_no_header() {
        let mut out = Vec::new();
        hex_dump(&mut out, &[1, 0, 0, 0, 0, 0, 0, 0], false).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "0000000000000001\n");
    }

    #[test]
    fn test_escaped_ascii() {
        let mut out = Vec::new();
        escaped_ascii(&mut out, b"ok\x01!").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "ok\\x01!");
    }
}
