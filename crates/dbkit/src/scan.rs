//! Quote- and comment-aware scanning of SQL text.
//!
//! Placeholders (`?`) only count when they appear in parameter position:
//! occurrences inside string literals, quoted identifiers, dollar-quoted
//! strings, and comments are literal text. The same walk backs placeholder
//! counting, `?` to `$n` renumbering for the wire, and debug-only literal
//! substitution.

/// Byte offsets of every `?` in parameter position.
pub(crate) fn placeholder_offsets(sql: &str) -> Vec<usize> {
    let bytes = sql.as_bytes();
    let mut offsets = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'?' => {
                offsets.push(i);
                i += 1;
            }
            b'\'' => i = skip_string_literal(bytes, i, is_escape_string_opener(bytes, i)),
            b'"' => i = skip_quoted(bytes, i, b'"'),
            b'$' => i = skip_dollar_quoted(bytes, i),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = match sql[i..].find('\n') {
                    Some(pos) => i + pos + 1,
                    None => bytes.len(),
                };
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            _ => i += 1,
        }
    }
    offsets
}

/// Number of `?` placeholders in parameter position.
pub(crate) fn count_placeholders(sql: &str) -> usize {
    placeholder_offsets(sql).len()
}

/// Replace each parameter-position `?` with `repl(index)` (0-based, in text
/// order), leaving all other text untouched.
pub(crate) fn replace_placeholders(sql: &str, mut repl: impl FnMut(usize) -> String) -> String {
    let offsets = placeholder_offsets(sql);
    let mut out = String::with_capacity(sql.len() + offsets.len() * 3);
    let mut last = 0;
    for (idx, &off) in offsets.iter().enumerate() {
        out.push_str(&sql[last..off]);
        out.push_str(&repl(idx));
        last = off + 1;
    }
    out.push_str(&sql[last..]);
    out
}

/// Rewrite portable `?` placeholders as `$1..$n` for the Postgres wire form.
pub(crate) fn to_positional(sql: &str) -> String {
    replace_placeholders(sql, |i| format!("${}", i + 1))
}

// Does the quote at `quote_at` open an E'..' escape-string literal? The
// `E` must be its own token, not the tail of an identifier or keyword.
fn is_escape_string_opener(bytes: &[u8], quote_at: usize) -> bool {
    if quote_at == 0 || !matches!(bytes[quote_at - 1], b'E' | b'e') {
        return false;
    }
    quote_at < 2 || !is_ident_byte(bytes[quote_at - 2])
}

fn is_ident_byte(b: u8) -> bool {
    b == b'_' || b.is_ascii_alphanumeric()
}

// Skip a 'string literal'. Always handles '' doubling; backslash escapes
// apply only in the E'..' form — under standard_conforming_strings (the
// Postgres default) a backslash in a plain literal is ordinary text, so
// `'C:\'` is a complete literal.
fn skip_string_literal(bytes: &[u8], start: usize, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if backslash_escapes => i += 2,
            b'\'' => {
                if bytes.get(i + 1) == Some(&b'\'') {
                    i += 2;
                } else {
                    return i + 1;
                }
            }
            _ => i += 1,
        }
    }
    i
}

// Skip a "quoted identifier" (or any delimiter with "" style doubling).
fn skip_quoted(bytes: &[u8], start: usize, delim: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == delim {
            if bytes.get(i + 1) == Some(&delim) {
                i += 2;
            } else {
                return i + 1;
            }
        } else {
            i += 1;
        }
    }
    i
}

// Skip a $tag$ ... $tag$ dollar-quoted string. A `$` that does not open a
// valid dollar-quote delimiter is ordinary text.
fn skip_dollar_quoted(bytes: &[u8], start: usize) -> usize {
    let mut end = start + 1;
    while end < bytes.len() && (bytes[end] == b'_' || bytes[end].is_ascii_alphanumeric()) {
        end += 1;
    }
    if end >= bytes.len() || bytes[end] != b'$' {
        return start + 1;
    }
    let delim = &bytes[start..=end];
    let mut i = end + 1;
    while i + delim.len() <= bytes.len() {
        if &bytes[i..i + delim.len()] == delim {
            return i + delim.len();
        }
        i += 1;
    }
    bytes.len()
}

// Skip a /* block comment */, honoring nesting.
fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut depth = 1;
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'/' && bytes[i + 1] == b'*' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_bare_placeholders() {
        assert_eq!(count_placeholders("SELECT * FROM t WHERE a = ? AND b = ?"), 2);
    }

    #[test]
    fn ignores_placeholders_in_string_literals() {
        assert_eq!(count_placeholders("SELECT '?' WHERE a = ?"), 1);
        assert_eq!(count_placeholders("SELECT 'it''s ?' WHERE a = ?"), 1);
        assert_eq!(count_placeholders(r"SELECT E'\'?' WHERE a = ?"), 1);
    }

    #[test]
    fn backslash_in_plain_literal_is_ordinary_text() {
        // standard_conforming_strings: `'C:\'` closes at the quote.
        assert_eq!(
            count_placeholders(r"SELECT * FROM t WHERE dir = 'C:\' AND owner = ?"),
            1
        );
        assert_eq!(count_placeholders(r"SELECT '\' , ? , '\'"), 1);
    }

    #[test]
    fn escape_form_still_honors_backslash() {
        assert_eq!(count_placeholders(r"SELECT E'a\'?b' WHERE x = ?"), 1);
        assert_eq!(count_placeholders(r"SELECT e'\'?' WHERE x = ?"), 1);
        // `E` glued to an identifier does not open an escape string.
        assert_eq!(count_placeholders(r"SELECT CASE'\' WHEN ? THEN 1 END"), 1);
    }

    #[test]
    fn ignores_placeholders_in_quoted_identifiers() {
        assert_eq!(count_placeholders(r#"SELECT "odd?name" FROM t WHERE x = ?"#), 1);
    }

    #[test]
    fn ignores_placeholders_in_comments() {
        assert_eq!(count_placeholders("SELECT 1 -- was ?\n WHERE x = ?"), 1);
        assert_eq!(count_placeholders("SELECT 1 /* ? /* nested ? */ */ WHERE x = ?"), 1);
    }

    #[test]
    fn ignores_placeholders_in_dollar_quotes() {
        assert_eq!(count_placeholders("SELECT $tag$ ? $tag$ WHERE x = ?"), 1);
        assert_eq!(count_placeholders("SELECT $$ ? $$ WHERE x = ?"), 1);
    }

    #[test]
    fn lone_dollar_is_ordinary_text() {
        assert_eq!(count_placeholders("SELECT price$ FROM t WHERE x = ?"), 1);
    }

    #[test]
    fn renumbers_to_positional() {
        assert_eq!(
            to_positional("SELECT * FROM t WHERE a = ? AND b IN (?, ?)"),
            "SELECT * FROM t WHERE a = $1 AND b IN ($2, $3)"
        );
    }

    #[test]
    fn renumbering_skips_quoted_text() {
        assert_eq!(
            to_positional("SELECT '?' FROM t WHERE a = ?"),
            "SELECT '?' FROM t WHERE a = $1"
        );
    }

    #[test]
    fn replace_receives_text_order_indices() {
        let out = replace_placeholders("?+?+?", |i| format!("<{i}>"));
        assert_eq!(out, "<0>+<1>+<2>");
    }
}
