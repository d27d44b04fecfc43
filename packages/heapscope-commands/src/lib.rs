/*
 * Heapscope Commands - Interactive Command Layer
 *
 * Turns a small command language into invocations over the analysis
 * session:
 * - tokenizer : whitespace (incl. non-breaking space), comments, line
 *               continuation
 * - io        : input stack with script sourcing, output stack with
 *               per-command redirection, error sink with script context
 * - context   : positional arguments, repeatable /switch values, boolean
 *               and hex parsing
 * - runner    : dispatch, built-ins (help, redirect, source), completion
 * - commands  : count/summarize/list/enumerate/describe/show over named
 *               allocation sets, with /extend rule support
 * - snapshot  : declarative JSON snapshot host for the demo binary and
 *               the integration tests
 */

pub mod commands;
pub mod context;
pub mod errors;
pub mod io;
pub mod runner;
pub mod snapshot;
pub mod tokenizer;

pub use context::Context;
pub use errors::{CommandError, Result};
pub use io::{ErrorSink, InputStack, LineSource, OutputStack, ScriptContext};
pub use runner::{CommandHandler, Runner};
