//! Top-level CSS rule splitting for the stylesheet object model.
//!
//! Stylesheets keep their rules as a text list so rule-level insert/delete
//! operations and full-text replaces can both be expressed. This splitter
//! recognizes rule boundaries only — qualified rules end after their block,
//! at-rules without a block end at their semicolon — and leaves rule contents
//! untouched.

use cssparser::{ParseError, Parser, ParserInput, Token};

/// Split a CSS text into its top-level rules, in order.
pub fn split_rules(css: &str) -> Vec<String> {
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut rules = Vec::new();
    let mut start = parser.position();
    let mut saw_content = false;

    loop {
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        match token {
            Token::WhiteSpace(_) | Token::Comment(_) if !saw_content => {
                // Leading trivia belongs to no rule
                start = parser.position();
            }
            Token::CurlyBracketBlock => {
                let _: Result<(), ParseError<()>> = parser.parse_nested_block(|_| Ok(()));
                let end = parser.position();
                let rule = parser.slice(start..end).trim();
                if !rule.is_empty() {
                    rules.push(rule.to_string());
                }
                start = end;
                saw_content = false;
            }
            Token::Semicolon => {
                let end = parser.position();
                let rule = parser.slice(start..end).trim();
                if !rule.is_empty() {
                    rules.push(rule.to_string());
                }
                start = end;
                saw_content = false;
            }
            _ => saw_content = true,
        }
    }

    let tail = parser.slice_from(start).trim();
    if !tail.is_empty() {
        rules.push(tail.to_string());
    }
    rules
}
