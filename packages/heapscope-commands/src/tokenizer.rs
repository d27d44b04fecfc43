//! Command-line tokenizer.
//!
//! Input is UTF-8. Token separators are ASCII space, tab, and the
//! non-breaking space U+00A0 (bytes 0xC2 0xA0). `#` starts a comment that
//! runs to the end of the line, and a trailing `\` joins the next line
//! onto the current statement. A blank line ends a statement that already
//! has tokens (a continuation may have promised more), and is skipped
//! otherwise.

/// What one physical line contributed to the statement being built.
#[derive(Debug, PartialEq, Eq)]
pub enum LineStep {
    /// Statement complete; tokens are ready.
    Done,
    /// The line ended with `\` or contributed nothing yet; read another.
    NeedMore,
}

fn is_separator(c: char) -> bool {
    c == ' ' || c == '\t' || c == '\u{a0}'
}

/// Fold one physical line into `tokens`.
pub fn push_line(tokens: &mut Vec<String>, line: &str) -> LineStep {
    let mut line = line.strip_suffix('\n').unwrap_or(line);
    line = line.strip_suffix('\r').unwrap_or(line);

    let continues = line.ends_with('\\');
    if continues {
        line = &line[..line.len() - 1];
    }
    let line = match line.find('#') {
        Some(comment) => &line[..comment],
        None => line,
    };

    let mut found_any = false;
    for token in line.split(is_separator) {
        if !token.is_empty() {
            tokens.push(token.to_string());
            found_any = true;
        }
    }

    if continues {
        return LineStep::NeedMore;
    }
    if !found_any && tokens.is_empty() {
        // Nothing yet; the statement has not started.
        return LineStep::NeedMore;
    }
    LineStep::Done
}

/// Tokenize a complete statement, following continuations across embedded
/// newlines. Used by tests and by hosts that feed whole statements.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut lines = input.split('\n').peekable();
    while let Some(line) = lines.next() {
        match push_line(&mut tokens, line) {
            LineStep::Done => break,
            LineStep::NeedMore => {
                if lines.peek().is_none() {
                    break;
                }
            }
        }
    }
    tokens
}
