//! Minimal lexical scanning over opaque SQL text.
//!
//! Queries are never parsed. The only thing the shell needs to know about a
//! statement is where its `?` bind markers are and whether a given offset sits
//! inside a quoted region ('string', "identifier", [identifier], `identifier`)
//! or a comment.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

fn closing_quote(open: char) -> char {
    if open == '[' { ']' } else { open }
}

/// Walk `sql` and call `visit(byte_offset, char, region)` for every char.
fn scan(sql: &str, mut visit: impl FnMut(usize, char, Region)) {
    let mut region = Region::Code;
    let mut chars = sql.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        visit(pos, ch, region);
        match region {
            Region::Code => match ch {
                '\'' | '"' | '`' | '[' => region = Region::Quoted(ch),
                '-' if matches!(chars.peek(), Some((_, '-'))) => region = Region::LineComment,
                '/' if matches!(chars.peek(), Some((_, '*'))) => region = Region::BlockComment,
                _ => {}
            },
            Region::Quoted(open) => {
                let close = closing_quote(open);
                if ch == close {
                    // A doubled quote is an escaped quote, not the end of the literal.
                    if close != ']' && matches!(chars.peek(), Some((_, c)) if *c == close) {
                        if let Some((next_pos, next)) = chars.next() {
                            visit(next_pos, next, region);
                        }
                    } else {
                        region = Region::Code;
                    }
                }
            }
            Region::LineComment => {
                if ch == '\n' {
                    region = Region::Code;
                }
            }
            Region::BlockComment => {
                if ch == '*' && matches!(chars.peek(), Some((_, '/'))) {
                    if let Some((next_pos, next)) = chars.next() {
                        visit(next_pos, next, region);
                    }
                    region = Region::Code;
                }
            }
        }
    }
}

/// Byte offsets of every `?` bind marker that sits in plain code.
pub fn bind_marker_offsets(sql: &str) -> Vec<usize> {
    let mut offsets = Vec::new();
    scan(sql, |pos, ch, region| {
        if ch == '?' && region == Region::Code {
            offsets.push(pos);
        }
    });
    offsets
}

/// Whether the byte at `offset` falls inside a quoted literal or identifier.
pub fn is_quoted_at(sql: &str, offset: usize) -> bool {
    let mut quoted = false;
    scan(sql, |pos, _, region| {
        if pos == offset {
            quoted = matches!(region, Region::Quoted(_));
        }
    });
    quoted
}

/// Replace the n-th `?` bind marker (counting from 1) with `marker(n)`.
pub fn rewrite_bind_markers(sql: &str, mut marker: impl FnMut(usize) -> String) -> String {
    let offsets = bind_marker_offsets(sql);
    if offsets.is_empty() {
        return sql.to_string();
    }

    let mut rewritten = String::with_capacity(sql.len() + offsets.len() * 2);
    let mut last = 0;
    for (n, offset) in offsets.iter().enumerate() {
        rewritten.push_str(&sql[last..*offset]);
        rewritten.push_str(&marker(n + 1));
        last = offset + 1;
    }
    rewritten.push_str(&sql[last..]);
    rewritten
}

/// Rewrite `?` bind markers as PostgreSQL style `$1, $2, ...`.
pub fn number_bind_markers(sql: &str) -> String {
    rewrite_bind_markers(sql, |n| format!("${n}"))
}
