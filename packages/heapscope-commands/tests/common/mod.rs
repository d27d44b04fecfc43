//! Shared harness: build a session from JSON, run statements through the
//! runner, capture stdout and stderr.
#![allow(dead_code)]

use std::cell::RefCell;
use std::io::{self, Cursor, Write};
use std::rc::Rc;

use heapscope_commands::commands::register_set_commands;
use heapscope_commands::io::{OutputStack, ReaderSource};
use heapscope_commands::runner::Runner;
use heapscope_commands::snapshot::{build_session, SnapshotSpec};
use heapscope_core::Session;

pub struct CaptureWriter(pub Rc<RefCell<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn session_from_json(json: &str) -> Session {
    let spec: SnapshotSpec = serde_json::from_str(json).expect("fixture json parses");
    let (session, _warnings) = build_session(spec).expect("fixture session builds");
    session
}

/// Run statements against the session; returns (stdout, stderr).
pub fn run_commands(session: &Session, input: &str) -> (String, String) {
    let out_buffer: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let err_buffer: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    {
        let mut runner = Runner::new(
            session,
            Box::new(ReaderSource::new(Cursor::new(input.to_string()))),
            OutputStack::new(Box::new(CaptureWriter(Rc::clone(&out_buffer)))),
            Box::new(CaptureWriter(Rc::clone(&err_buffer))),
        );
        register_set_commands(&mut runner);
        runner.run().expect("runner reaches end of input");
    }
    let out = String::from_utf8(out_buffer.borrow().clone()).expect("stdout is UTF-8");
    let err = String::from_utf8(err_buffer.borrow().clone()).expect("stderr is UTF-8");
    (out, err)
}

/// A small heap: two used allocations with a reference between them, a
/// leaked allocation, three free allocations, one signed allocation, and
/// one static root anchoring the reference chain.
pub const SMALL_HEAP: &str = r#"{
    "ranges": [
        {"base": "0x1000", "words": ["0x2000", "0x0"]},
        {"base": "0x2000", "words": ["0x0", "0x0"]},
        {"base": "0x3000", "words": ["0x0", "0x0"]},
        {"base": "0x3100", "words": ["0x0", "0x0", "0x0", "0x0"]},
        {"base": "0x3200", "words": ["0x0", "0x0", "0x0", "0x0"]},
        {"base": "0x4000", "words": ["0x0", "0x0"]},
        {"base": "0x5000", "words": ["0x7f10", "0x0"]},
        {"base": "0x100000", "words": ["0x1000", "0x0"]}
    ],
    "allocations": [
        {"address": "0x1000", "size": "0x10", "used": true},
        {"address": "0x2000", "size": "0x10", "used": true},
        {"address": "0x3000", "size": "0x10", "used": false},
        {"address": "0x3100", "size": "0x20", "used": false},
        {"address": "0x3200", "size": "0x20", "used": false},
        {"address": "0x4000", "size": "0x10", "used": true},
        {"address": "0x5000", "size": "0x10", "used": true}
    ],
    "static_ranges": [["0x100000", "0x100010"]],
    "signatures": [{"value": "0x7f10", "name": "Widget"}],
    "redirect_prefix": "run"
}"#;
