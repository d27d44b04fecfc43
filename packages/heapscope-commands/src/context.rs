//! Per-command context: tokens split into positional arguments and
//! repeatable `/switch value` pairs, with hex and boolean parsing
//! helpers and redirect-path derivation.

use std::collections::BTreeMap;

use crate::io::ErrorSink;

/// Longest redirect file name; longer ones fail to open, so they are
/// truncated instead.
const MAX_REDIRECT_PATH_BYTES: usize = 255;

pub struct Context {
    tokens: Vec<String>,
    positionals: Vec<String>,
    switches: BTreeMap<String, Vec<String>>,
    has_ill_formed_switch: bool,
}

impl Context {
    /// Split tokens into positionals and switches. Every switch takes
    /// exactly one argument; violations are reported but parsing
    /// continues so one command surfaces all its problems at once.
    pub fn parse(tokens: Vec<String>, error: &mut ErrorSink) -> Self {
        let mut positionals: Vec<String> = Vec::new();
        let mut switches: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut has_ill_formed_switch = false;
        let mut switch_name: Option<String> = None;
        for (arg_num, token) in tokens.iter().enumerate() {
            if let Some(name) = token.strip_prefix('/') {
                if let Some(pending) = &switch_name {
                    error.emit(&format!("Expected argument for switch {}\n", pending));
                    has_ill_formed_switch = true;
                } else if arg_num == 0 {
                    error.emit("No switches are allowed before the command name.\n");
                    has_ill_formed_switch = true;
                }
                if name.is_empty() {
                    error.emit("An unexpected empty switch name was found.\n");
                    has_ill_formed_switch = true;
                }
                switch_name = Some(name.to_string());
            } else if let Some(name) = switch_name.take() {
                switches.entry(name).or_default().push(token.clone());
            } else {
                positionals.push(token.clone());
            }
        }
        if let Some(pending) = switch_name {
            error.emit(&format!("Expected argument for switch {}\n", pending));
            has_ill_formed_switch = true;
        }
        Self {
            tokens,
            positionals,
            switches,
            has_ill_formed_switch,
        }
    }

    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub fn token_at(&self, index: usize) -> &str {
        self.tokens.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn num_positionals(&self) -> usize {
        self.positionals.len()
    }

    pub fn positional(&self, index: usize) -> &str {
        self.positionals
            .get(index)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Parse a positional as hexadecimal, `0x` prefix optional.
    pub fn parse_positional_hex(&self, index: usize) -> Option<u64> {
        parse_hex(self.positional(index))
    }

    /// Names of every switch supplied on the command line.
    pub fn switch_names(&self) -> impl Iterator<Item = &str> {
        self.switches.keys().map(String::as_str)
    }

    pub fn num_arguments(&self, switch_name: &str) -> usize {
        self.switches
            .get(switch_name)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn arguments(&self, switch_name: &str) -> &[String] {
        self.switches
            .get(switch_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn argument(&self, switch_name: &str, index: usize) -> &str {
        self.arguments(switch_name)
            .get(index)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Parse one switch argument as hexadecimal, reporting a malformed
    /// value.
    pub fn parse_argument_hex(
        &self,
        switch_name: &str,
        index: usize,
        error: &mut ErrorSink,
    ) -> Option<u64> {
        let arguments = self.arguments(switch_name);
        let text = arguments.get(index)?;
        match parse_hex(text) {
            Some(value) => Some(value),
            None => {
                error.emit(&format!(
                    "Invalid argument to /{}: \"{}\"\n",
                    switch_name, text
                ));
                None
            }
        }
    }

    /// If the switch is absent, leave `value` unchanged and succeed. If
    /// every occurrence is `true` or `false` and they agree, set `value`.
    /// Anything else is reported and fails.
    pub fn parse_boolean_switch(
        &self,
        switch_name: &str,
        value: &mut bool,
        error: &mut ErrorSink,
    ) -> bool {
        let Some(arguments) = self.switches.get(switch_name) else {
            return true;
        };
        let mut parsed: Option<bool> = None;
        for argument in arguments {
            let this_one = match argument.as_str() {
                "true" => true,
                "false" => false,
                other => {
                    error.emit(&format!(
                        "Unexpected argument \"{}\" to /{} switch.\n",
                        other, switch_name
                    ));
                    return false;
                }
            };
            match parsed {
                Some(previous) if previous != this_one => {
                    error.emit(&format!(
                        "Conflicting arguments to multiple /{} switches.\n",
                        switch_name
                    ));
                    return false;
                }
                _ => parsed = Some(this_one),
            }
        }
        if let Some(result) = parsed {
            *value = result;
        }
        true
    }

    pub fn has_ill_formed_switch(&self) -> bool {
        self.has_ill_formed_switch
    }

    /// Whether this command asked for redirection itself.
    pub fn has_redirect_suffix(&self) -> bool {
        !self.argument("redirectSuffix", 0).is_empty()
    }

    /// Redirect file name: `<prefix>.<suffix>` when `/redirectSuffix` was
    /// given, otherwise derived from the whole command line, truncated to
    /// a length the filesystem will accept.
    pub fn redirect_path(&self, prefix: &str) -> String {
        let mut path = prefix.to_string();
        let suffix = self.argument("redirectSuffix", 0);
        if !suffix.is_empty() {
            path.push('.');
            path.push_str(suffix);
        } else {
            for (i, positional) in self.positionals.iter().enumerate() {
                path.push(if i == 0 { '.' } else { '_' });
                path.push_str(positional);
            }
            for (name, arguments) in &self.switches {
                path.push_str("::");
                path.push_str(name);
                for argument in arguments {
                    path.push(':');
                    path.push_str(argument);
                }
            }
        }
        truncate_to_bytes(path, MAX_REDIRECT_PATH_BYTES)
    }
}

fn parse_hex(text: &str) -> Option<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

fn truncate_to_bytes(mut text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text
}
