//! Slicing unit text out of the original statement.
//!
//! The AST tells us what the CTEs are; the token stream tells us where their
//! bodies sit in the source, so bodies keep the author's formatting.

use crate::types::Dialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, TokenWithSpan, Tokenizer};

/// Source text of each CTE body and of the trailing query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WithClauseSlices {
    pub cte_bodies: Vec<String>,
    pub main: String,
}

/// A non-whitespace token and its byte offset in the source.
struct Located {
    token: Token,
    start: usize,
}

fn significant_tokens(sql: &str, dialect: Dialect) -> Option<Vec<Located>> {
    let dialect = dialect.to_sqlparser_dialect();
    let mut tokenizer = Tokenizer::new(dialect.as_ref(), sql);
    let tokens: Vec<TokenWithSpan> = tokenizer.tokenize_with_location().ok()?;

    let mut out = Vec::with_capacity(tokens.len());
    for TokenWithSpan { token, span } in tokens {
        if matches!(token, Token::Whitespace(_) | Token::EOF) {
            continue;
        }
        let start = line_col_to_offset(sql, span.start.line as usize, span.start.column as usize)?;
        out.push(Located { token, start });
    }
    Some(out)
}

fn is_keyword(token: &Token, keyword: Keyword) -> bool {
    matches!(token, Token::Word(word) if word.keyword == keyword)
}

/// Splits `WITH a AS (...), b AS (...) <main>` into its text pieces.
///
/// Returns `None` when the text does not start with a `WITH` clause or the
/// parentheses do not balance; callers fall back to AST rendering.
pub(crate) fn slice_with_clause(sql: &str, dialect: Dialect) -> Option<WithClauseSlices> {
    let tokens = significant_tokens(sql, dialect)?;
    let end = statement_end(sql, &tokens);

    let mut idx = 0;
    if !is_keyword(&tokens.get(idx)?.token, Keyword::WITH) {
        return None;
    }
    idx += 1;
    if is_keyword(&tokens.get(idx)?.token, Keyword::RECURSIVE) {
        idx += 1;
    }

    let mut cte_bodies = Vec::new();
    loop {
        // Name and optional column list, up to `AS` outside parentheses.
        let mut depth = 0usize;
        loop {
            let token = &tokens.get(idx)?.token;
            match token {
                Token::LParen => depth += 1,
                Token::RParen => depth = depth.checked_sub(1)?,
                _ if depth == 0 && is_keyword(token, Keyword::AS) => break,
                _ => {}
            }
            idx += 1;
        }
        idx += 1;

        if is_keyword(&tokens.get(idx)?.token, Keyword::NOT) {
            idx += 1;
        }
        if is_keyword(&tokens.get(idx)?.token, Keyword::MATERIALIZED) {
            idx += 1;
        }

        let open = tokens.get(idx)?;
        if open.token != Token::LParen {
            return None;
        }
        let body_start = open.start + 1;

        let mut depth = 1usize;
        let close = loop {
            idx += 1;
            let located = tokens.get(idx)?;
            match located.token {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        break located;
                    }
                }
                _ => {}
            }
        };
        cte_bodies.push(sql[body_start..close.start].trim().to_string());
        idx += 1;

        match tokens.get(idx) {
            Some(located) if located.token == Token::Comma => idx += 1,
            Some(located) => {
                let main = sql[located.start..end].trim().to_string();
                return Some(WithClauseSlices { cte_bodies, main });
            }
            None => return None,
        }
    }
}

/// The statement text without surrounding whitespace or a trailing semicolon.
pub(crate) fn statement_text(sql: &str, dialect: Dialect) -> Option<String> {
    let tokens = significant_tokens(sql, dialect)?;
    let start = tokens.first()?.start;
    let end = statement_end(sql, &tokens);
    Some(sql[start..end.max(start)].trim().to_string())
}

/// Byte offset where the statement ends: the final semicolon, or end of input.
fn statement_end(sql: &str, tokens: &[Located]) -> usize {
    match tokens.last() {
        Some(located) if located.token == Token::SemiColon => located.start,
        _ => sql.len(),
    }
}

/// Converts sqlparser's 1-based line/column (columns counted in chars) to a
/// byte offset.
fn line_col_to_offset(sql: &str, line: usize, column: usize) -> Option<usize> {
    if line == 0 || column == 0 {
        return None;
    }

    let bytes = sql.as_bytes();
    let mut offset = 0;
    for _ in 1..line {
        let newline_pos = bytes.get(offset..)?.iter().position(|&b| b == b'\n')?;
        offset += newline_pos + 1;
    }

    let line_start = offset;
    let line_len = bytes
        .get(line_start..)?
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(sql.len() - line_start);
    let line_slice = &sql[line_start..line_start + line_len];

    let mut current_column = 1;
    for (rel_offset, _) in line_slice.char_indices() {
        if current_column == column {
            return Some(line_start + rel_offset);
        }
        current_column += 1;
    }

    (column == current_column).then_some(line_start + line_len)
}
