//! URL-bearing value syntaxes shared by the recording and playback sides.
//!
//! The inliner rewrites real URLs into `asset:N` placeholder tokens; the
//! playback asset manager rewrites those tokens into synthetic URLs. Both
//! directions go through the helpers here so the two sides agree on attribute
//! syntax (plain URL, `srcset` candidate lists, CSS `url(...)` productions).

use cssparser::{ParseError, Parser, ParserInput, SourcePosition, Token};

use crate::AssetId;

/// The literal placeholder scheme.
pub const ASSET_SCHEME: &str = "asset:";

pub fn format_asset_token(id: AssetId) -> String {
    format!("asset:{id}")
}

/// Parse an `asset:N` token. Leading/trailing whitespace is tolerated since
/// attribute values round-trip through serializers that may add it.
pub fn parse_asset_token(value: &str) -> Option<AssetId> {
    value.trim().strip_prefix(ASSET_SCHEME)?.parse().ok()
}

/// URLs whose content travels inside the URL itself. These are never interned
/// as assets and never rewritten.
pub fn is_self_contained_url(raw: &str) -> bool {
    let raw = raw.trim_start();
    ["data:", "blob:", "about:", "javascript:"]
        .iter()
        .any(|scheme| {
            raw.len() >= scheme.len() && raw[..scheme.len()].eq_ignore_ascii_case(scheme)
        })
}

// ---------------------------------------------------------------------------
// srcset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SrcsetCandidate {
    pub url: String,
    /// Width/density descriptor (`2x`, `640w`), preserved verbatim.
    pub descriptor: Option<String>,
}

/// Parse a `srcset` attribute into its candidates.
pub fn parse_srcset(value: &str) -> Vec<SrcsetCandidate> {
    value
        .split(',')
        .filter_map(|candidate| {
            let mut parts = candidate.split_whitespace();
            let url = parts.next()?.to_string();
            let descriptor = {
                let rest = parts.collect::<Vec<_>>().join(" ");
                (!rest.is_empty()).then_some(rest)
            };
            Some(SrcsetCandidate { url, descriptor })
        })
        .collect()
}

pub fn serialize_srcset(candidates: &[SrcsetCandidate]) -> String {
    candidates
        .iter()
        .map(|c| match &c.descriptor {
            Some(d) => format!("{} {}", c.url, d),
            None => c.url.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rewrite each candidate URL of a `srcset` value, preserving descriptors.
/// The closure returns `None` to leave a URL untouched.
pub fn rewrite_srcset<F>(value: &str, mut rewrite: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut candidates = parse_srcset(value);
    for candidate in &mut candidates {
        if let Some(replacement) = rewrite(&candidate.url) {
            candidate.url = replacement;
        }
    }
    serialize_srcset(&candidates)
}

// ---------------------------------------------------------------------------
// CSS url(...) productions
// ---------------------------------------------------------------------------

/// Rewrite every `url(...)` production in a CSS text (a full stylesheet or a
/// `style` attribute's declaration list). The closure returns `None` to leave
/// a URL untouched. Everything outside the rewritten productions is preserved
/// byte-for-byte.
pub fn rewrite_css_urls<F>(css: &str, mut rewrite: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut out = String::with_capacity(css.len());
    let mut last = parser.position();
    rewrite_urls_in_block(&mut parser, &mut out, &mut last, &mut rewrite);
    out.push_str(parser.slice_from(last));
    out
}

fn rewrite_urls_in_block<'i, F>(
    parser: &mut Parser<'i, '_>,
    out: &mut String,
    last: &mut SourcePosition,
    rewrite: &mut F,
) where
    F: FnMut(&str) -> Option<String>,
{
    loop {
        let start = parser.position();
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        match token {
            Token::UnquotedUrl(value) => {
                if let Some(replacement) = rewrite(&value) {
                    let end = parser.position();
                    out.push_str(parser.slice(*last..start));
                    push_url_production(out, &replacement);
                    *last = end;
                }
            }
            // url("...") tokenizes as a function; image-set carries nested
            // strings/urls and recurses like any other block below.
            Token::Function(ref name) if name.eq_ignore_ascii_case("url") => {
                let parsed: Result<Option<String>, ParseError<'i, ()>> =
                    parser.parse_nested_block(|p| {
                        let url = p.expect_string()?.as_ref().to_owned();
                        Ok(rewrite(&url))
                    });
                if let Ok(Some(replacement)) = parsed {
                    let end = parser.position();
                    out.push_str(parser.slice(*last..start));
                    push_url_production(out, &replacement);
                    *last = end;
                }
            }
            Token::Function(_)
            | Token::ParenthesisBlock
            | Token::SquareBracketBlock
            | Token::CurlyBracketBlock => {
                // Descend; an unparsed block would be skipped wholesale and
                // its url() tokens missed.
                let _: Result<(), ParseError<'i, ()>> = parser.parse_nested_block(|p| {
                    rewrite_urls_in_block(p, out, last, rewrite);
                    Ok(())
                });
            }
            _ => {}
        }
    }
}

fn push_url_production(out: &mut String, url: &str) {
    out.push_str("url(\"");
    // Synthetic and placeholder URLs never contain quotes, but arbitrary
    // rewrites might.
    out.push_str(&url.replace('\\', "\\\\").replace('"', "\\\""));
    out.push_str("\")");
}

/// Collect the URLs of every `url(...)` production, in document order.
pub fn collect_css_urls(css: &str) -> Vec<String> {
    let mut urls = Vec::new();
    rewrite_css_urls(css, |url| {
        urls.push(url.to_string());
        None
    });
    urls
}
