//! Command dispatch.
//!
//! The runner owns the input/output/error plumbing for one session and a
//! registry of command handlers. Dispatch probes every handler registered
//! under the command name in check-only mode; the one accepting the most
//! leading tokens runs, with ties broken by registration order.
//!
//! Built-in commands: `help [topic]`, `redirect on|off`, and
//! `source <path>`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::Write;
use std::rc::Rc;

use heapscope_core::Session;
use rustc_hash::FxHashMap;

use crate::context::Context;
use crate::errors::{CommandError, Result};
use crate::io::{ErrorSink, InputStack, LineSource, OutputStack, ScriptContext};

/// One registered command implementation.
pub trait CommandHandler {
    /// Check-only probe: how many leading tokens this handler would
    /// consume for the given command line. Zero declines the command.
    fn accepts(&self, session: &Session, context: &Context) -> usize;

    fn run(
        &self,
        session: &Session,
        output: Rc<RefCell<OutputStack>>,
        error: &mut ErrorSink,
        context: &Context,
    ) -> Result<()>;

    fn help(&self, out: &mut dyn Write);

    /// Candidates for the token after the command name, for completion.
    fn second_token_candidates(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Static snapshot of completable names, shared with the line editor.
#[derive(Debug, Clone, Default)]
pub struct CompletionModel {
    commands: Vec<String>,
    subtokens: FxHashMap<String, Vec<String>>,
}

impl CompletionModel {
    /// Propose completions for a line prefix. Returns the byte position
    /// the completion replaces from, plus the candidates.
    pub fn complete(&self, line: &str) -> (usize, Vec<String>) {
        let trimmed_start = line.len() - line.trim_start().len();
        let trimmed = &line[trimmed_start..];
        match trimmed.find([' ', '\t']) {
            None => {
                let candidates = self
                    .commands
                    .iter()
                    .filter(|name| name.starts_with(trimmed))
                    .cloned()
                    .collect();
                (trimmed_start, candidates)
            }
            Some(space) => {
                let command = &trimmed[..space];
                let rest = &trimmed[space..];
                let sub_start = rest.len() - rest.trim_start().len();
                let sub_prefix = &rest[sub_start..];
                let candidates = self
                    .subtokens
                    .get(command)
                    .map(|names| {
                        names
                            .iter()
                            .filter(|name| name.starts_with(sub_prefix))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                (trimmed_start + space + sub_start, candidates)
            }
        }
    }
}

pub struct Runner<'s> {
    session: &'s Session,
    input: InputStack,
    output: Rc<RefCell<OutputStack>>,
    error: ErrorSink,
    handlers: BTreeMap<String, Vec<Rc<dyn CommandHandler>>>,
    redirect: bool,
}

impl<'s> Runner<'s> {
    pub fn new(
        session: &'s Session,
        base_input: Box<dyn LineSource>,
        output: OutputStack,
        error_sink: Box<dyn Write>,
    ) -> Self {
        let script_context: ScriptContext = Rc::new(RefCell::new(Vec::new()));
        Self {
            session,
            input: InputStack::new(base_input, Rc::clone(&script_context)),
            output: Rc::new(RefCell::new(output)),
            error: ErrorSink::new(error_sink, script_context),
            handlers: BTreeMap::new(),
            redirect: false,
        }
    }

    pub fn add_command(&mut self, name: impl Into<String>, handler: Rc<dyn CommandHandler>) {
        self.handlers.entry(name.into()).or_default().push(handler);
    }

    pub fn completion_model(&self) -> CompletionModel {
        let mut commands: Vec<String> =
            ["help", "redirect", "source"].iter().map(|s| s.to_string()).collect();
        commands.extend(self.handlers.keys().cloned());
        commands.sort();
        let mut subtokens = FxHashMap::default();
        for (name, handlers) in &self.handlers {
            let mut candidates: Vec<String> = handlers
                .iter()
                .flat_map(|h| h.second_token_candidates())
                .collect();
            candidates.sort();
            candidates.dedup();
            subtokens.insert(name.clone(), candidates);
        }
        CompletionModel {
            commands,
            subtokens,
        }
    }

    /// Run statements until end of input. Clean EOF returns `Ok`.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let tokens = self.input.get_tokens()?;
            self.error.set_context_write_pending();
            let context = Context::parse(tokens, &mut self.error);

            if context.has_ill_formed_switch() && context.token_at(0).starts_with('/') {
                continue;
            }
            let command = context.token_at(0).to_string();
            if command.is_empty() {
                if self.input.is_done() {
                    return Ok(());
                }
                // A script just finished.
                continue;
            }

            match command.as_str() {
                "help" => self.handle_help(&context),
                "redirect" => self.handle_redirect(&context),
                "source" => self.handle_source(&context),
                _ => self.dispatch(&command, &context),
            }
        }
    }

    fn abort_script_on_error(&mut self) {
        if self.input.is_in_script() {
            self.input.terminate_all_scripts();
        }
    }

    fn dispatch(&mut self, command: &str, context: &Context) {
        let best = self.handlers.get(command).and_then(|handlers| {
            let mut best: Option<(usize, Rc<dyn CommandHandler>)> = None;
            for handler in handlers {
                let accepted = handler.accepts(self.session, context);
                if accepted > best.as_ref().map(|(n, _)| *n).unwrap_or(0) {
                    best = Some((accepted, Rc::clone(handler)));
                }
            }
            best
        });

        let Some((_, handler)) = best else {
            self.error
                .emit(&format!("Command {} is not recognized\n", command));
            self.error.emit("Type \"help\" to get help.\n");
            self.abort_script_on_error();
            return;
        };

        let redirect_path = if self.redirect || context.has_redirect_suffix() {
            let path = context.redirect_path(self.session.options().redirect_prefix.as_str());
            match self.output.borrow_mut().push_target(&path) {
                Ok(()) => Some(path),
                Err(cause) => {
                    self.error
                        .emit(&format!("Failed to open {} for writing.\n{}\n", path, cause));
                    None
                }
            }
        } else {
            None
        };

        if context.has_ill_formed_switch() {
            self.abort_script_on_error();
        } else {
            let result = handler.run(
                self.session,
                Rc::clone(&self.output),
                &mut self.error,
                context,
            );
            match result {
                Ok(()) => {}
                Err(CommandError::Interrupted) => {
                    self.error.emit("\nThe command was interrupted.\n");
                    self.session.clear_interrupt();
                    self.input.terminate_all_scripts();
                }
                Err(CommandError::Aborted) => {
                    self.abort_script_on_error();
                }
                Err(other) => {
                    self.error.emit(&format!("{}\n", other));
                    self.abort_script_on_error();
                }
            }
        }

        if let Some(path) = redirect_path {
            let mut output = self.output.borrow_mut();
            output.pop_target();
            writeln!(output, "Wrote results to {}", path).ok();
        }
    }

    fn handle_help(&mut self, context: &Context) {
        if context.num_tokens() == 1 {
            self.show_command_list();
            return;
        }
        let topic = context.token_at(1).to_string();
        match topic.as_str() {
            "redirect" => {
                let mut out = self.output.borrow_mut();
                writeln!(
                    out,
                    "Use \"redirect on\" to enable redirection of output to separate files per command."
                )
                .ok();
                writeln!(
                    out,
                    "Use \"redirect off\" to disable redirection of output to separate files per command."
                )
                .ok();
            }
            "source" => {
                writeln!(
                    self.output.borrow_mut(),
                    "Use \"source <path>\" to run commands from the specified file."
                )
                .ok();
            }
            "help" => {
                {
                    let mut out = self.output.borrow_mut();
                    writeln!(
                        out,
                        "Use \"help <command-name>\" for help on the specified command."
                    )
                    .ok();
                    writeln!(out, "Use \"help\" with no arguments to see the following:").ok();
                }
                self.show_command_list();
            }
            other => match self.handlers.get(other).and_then(|h| h.first()).cloned() {
                Some(handler) => {
                    handler.help(&mut *self.output.borrow_mut());
                }
                None => {
                    writeln!(
                        self.output.borrow_mut(),
                        "\"{}\" is not a valid command name.",
                        other
                    )
                    .ok();
                    self.show_command_list();
                }
            },
        }
    }

    fn show_command_list(&mut self) {
        let mut out = self.output.borrow_mut();
        write!(out, "Supported commands are:\nhelp\nredirect\nsource\n").ok();
        for name in self.handlers.keys() {
            writeln!(out, "{}", name).ok();
        }
        writeln!(out, "Use \"help <command-name>\" for help on a specific command.").ok();
    }

    fn handle_redirect(&mut self, context: &Context) {
        let argument = context.token_at(1);
        if context.num_tokens() != 2 || (argument != "on" && argument != "off") {
            self.error.emit("usage:  redirect on|off\n");
        } else {
            self.redirect = argument == "on";
        }
    }

    fn handle_source(&mut self, context: &Context) {
        if context.num_tokens() != 2 {
            self.error.emit("usage:  source <command-file-path>\n");
        } else {
            let path = context.token_at(1).to_string();
            self.input.start_script(&path, &mut self.error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_model_first_and_second_token() {
        let model = CompletionModel {
            commands: vec![
                "count".to_string(),
                "describe".to_string(),
                "help".to_string(),
            ],
            subtokens: {
                let mut map = FxHashMap::default();
                map.insert(
                    "count".to_string(),
                    vec!["free".to_string(), "leaked".to_string(), "used".to_string()],
                );
                map
            },
        };
        let (start, names) = model.complete("co");
        assert_eq!(start, 0);
        assert_eq!(names, vec!["count"]);

        let (start, names) = model.complete("  count le");
        assert_eq!(start, 8);
        assert_eq!(names, vec!["leaked"]);

        let (_, names) = model.complete("unknown x");
        assert!(names.is_empty());
    }
}
