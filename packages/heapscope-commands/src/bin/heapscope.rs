//! Heapscope REPL - interactive analysis of a snapshotted process image.
//!
//! # Usage
//!
//! ```text
//! heapscope <snapshot.json> [command-file]
//! ```
//!
//! With a command file the statements run non-interactively; otherwise an
//! interactive prompt with history and tab completion comes up. Exit code
//! is 0 on clean end of input, 1 if the snapshot fails to load.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::Context as _;
use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Editor, Helper};
use tracing_subscriber::EnvFilter;

use heapscope_commands::commands::register_set_commands;
use heapscope_commands::io::{LineSource, OutputStack, ReaderSource};
use heapscope_commands::runner::{CompletionModel, Runner};
use heapscope_commands::snapshot::load_snapshot_file;

const PROMPT: &str = "\x1b[1;32mheapscope\x1b[0m> ";

type SharedModel = Rc<RefCell<CompletionModel>>;

struct ReplHelper {
    model: SharedModel,
}

impl Completer for ReplHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        Ok(self.model.borrow().complete(&line[..pos]))
    }
}

impl Hinter for ReplHelper {
    type Hint = String;
}

impl Highlighter for ReplHelper {}

impl Validator for ReplHelper {}

impl Helper for ReplHelper {}

struct ReplSource {
    editor: Editor<ReplHelper, DefaultHistory>,
}

impl ReplSource {
    fn new(model: SharedModel) -> rustyline::Result<Self> {
        let mut editor = Editor::new()?;
        editor.set_helper(Some(ReplHelper { model }));
        Ok(Self { editor })
    }
}

impl LineSource for ReplSource {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        match self.editor.readline(PROMPT) {
            Ok(line) => {
                let _ = self.editor.add_history_entry(line.as_str());
                Ok(Some(line))
            }
            Err(ReadlineError::Interrupted) => Ok(Some(String::new())),
            Err(ReadlineError::Eof) => Ok(None),
            Err(other) => Err(io::Error::new(io::ErrorKind::Other, other)),
        }
    }
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("HEAPSCOPE_LOG"))
        .with_writer(io::stderr)
        .init();

    let mut args = std::env::args_os().skip(1);
    let snapshot_path: PathBuf = args
        .next()
        .context("usage: heapscope <snapshot.json> [command-file]")?
        .into();
    let command_file: Option<PathBuf> = args.next().map(Into::into);

    let (session, warnings) = load_snapshot_file(&snapshot_path)?;
    for warning in &warnings {
        eprintln!("{}", warning);
    }

    let model: SharedModel = Rc::new(RefCell::new(CompletionModel::default()));
    let base: Box<dyn LineSource> = match &command_file {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open command file \"{}\"", path.display()))?;
            Box::new(ReaderSource::new(BufReader::new(file)))
        }
        None => Box::new(ReplSource::new(Rc::clone(&model))?),
    };

    let mut runner = Runner::new(
        &session,
        base,
        OutputStack::stdout(),
        Box::new(io::stderr()),
    );
    register_set_commands(&mut runner);
    *model.borrow_mut() = runner.completion_model();

    runner.run()?;
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{:#}", error);
            ExitCode::from(1)
        }
    }
}
