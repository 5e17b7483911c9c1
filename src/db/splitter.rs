/// Split a PostgreSQL script into individual statements.
///
/// Semicolons inside single-quoted literals (including `E'...'` escapes),
/// double-quoted identifiers and dollar-quoted bodies do not terminate a
/// statement. Comments are removed; fragments that contain nothing but
/// comments and whitespace produce no statement. Returned statements are
/// trimmed and carry no trailing `;`.
pub fn split_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            ';' => {
                push_statement(&mut statements, &mut current);
                i += 1;
            }
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                current.push(' ');
            }
            '/' if next == Some('*') => {
                i = skip_block_comment(&chars, i);
                current.push(' ');
            }
            '\'' => {
                let escapes = is_escape_string(&chars, i);
                i = copy_quoted(&chars, i, '\'', escapes, &mut current);
            }
            '"' => {
                i = copy_quoted(&chars, i, '"', false, &mut current);
            }
            '$' => match dollar_tag(&chars, i) {
                Some(tag) => {
                    i = copy_dollar_quoted(&chars, i, &tag, &mut current);
                }
                None => {
                    current.push(c);
                    i += 1;
                }
            },
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }

    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

/// Returns the index just past the closing `*/`, honouring nesting.
fn skip_block_comment(chars: &[char], start: usize) -> usize {
    let mut depth = 0;
    let mut i = start;
    while i < chars.len() {
        if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
            depth += 1;
            i += 2;
        } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    i
}

/// `E'...'` literal: the quote is preceded by a standalone `E`.
fn is_escape_string(chars: &[char], quote: usize) -> bool {
    if quote == 0 || !matches!(chars[quote - 1], 'e' | 'E') {
        return false;
    }
    quote < 2 || !is_ident_char(chars[quote - 2])
}

/// Copy a quoted run verbatim, handling doubled quotes (and backslashes in
/// escape strings). Returns the index just past the closing quote.
fn copy_quoted(chars: &[char], start: usize, quote: char, backslash: bool, out: &mut String) -> usize {
    out.push(quote);
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        if backslash && c == '\\' {
            if let Some(&escaped) = chars.get(i + 1) {
                out.push(escaped);
            }
            i += 2;
            continue;
        }
        if c == quote {
            if chars.get(i + 1) == Some(&quote) {
                out.push(quote);
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// The full opening delimiter (`$$` or `$tag$`) starting at `start`, if any.
fn dollar_tag(chars: &[char], start: usize) -> Option<String> {
    if start > 0 && is_ident_char(chars[start - 1]) {
        return None;
    }
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '$' {
            return Some(chars[start..=i].iter().collect());
        }
        let valid = if i == start + 1 {
            c.is_alphabetic() || c == '_'
        } else {
            c.is_alphanumeric() || c == '_'
        };
        if !valid {
            return None;
        }
        i += 1;
    }
    None
}

fn copy_dollar_quoted(chars: &[char], start: usize, tag: &str, out: &mut String) -> usize {
    let tag_chars: Vec<char> = tag.chars().collect();
    out.push_str(tag);
    let mut i = start + tag_chars.len();
    while i < chars.len() {
        if chars[i..].starts_with(&tag_chars) {
            out.push_str(tag);
            return i + tag_chars.len();
        }
        out.push(chars[i]);
        i += 1;
    }
    i
}
