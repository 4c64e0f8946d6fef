//! Selector grammar: CSS, XPath, text and `>>` frame hops.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::LocatorError;

/// Kind of a single selector hop
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    Css,
    XPath,
    /// Case-insensitive substring of rendered text, innermost matches only
    Text,
}

impl SelectorKind {
    /// Name passed to the page-side query function
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorKind::Css => "css",
            SelectorKind::XPath => "xpath",
            SelectorKind::Text => "text",
        }
    }
}

/// One hop of a selector chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorPart {
    pub kind: SelectorKind,
    pub query: String,
    /// Hop as written, used in error messages
    pub raw: String,
}

/// Parsed selector; every part but the last must resolve to a frame element
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    raw: String,
    parts: Vec<SelectorPart>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, LocatorError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(LocatorError::InvalidSelector("empty selector".to_string()));
        }

        let parts = split_hops(trimmed)
            .into_iter()
            .map(|hop| parse_part(&hop))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: trimmed.to_string(),
            parts,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn parts(&self) -> &[SelectorPart] {
        &self.parts
    }

    /// Hops that must each resolve to exactly one iframe
    pub fn frame_hops(&self) -> &[SelectorPart] {
        &self.parts[..self.parts.len() - 1]
    }

    /// Part resolved inside the final frame
    pub fn target(&self) -> &SelectorPart {
        &self.parts[self.parts.len() - 1]
    }

    pub fn has_frame_hops(&self) -> bool {
        self.parts.len() > 1
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for Selector {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

fn parse_part(hop: &str) -> Result<SelectorPart, LocatorError> {
    let raw = hop.trim().to_string();
    if raw.is_empty() {
        return Err(LocatorError::InvalidSelector(
            "empty hop in '>>' chain".to_string(),
        ));
    }

    let (kind, query) = if let Some(rest) = raw.strip_prefix("xpath=") {
        (SelectorKind::XPath, rest.to_string())
    } else if raw.starts_with("//") || raw.starts_with("(//") || raw.starts_with("..") {
        (SelectorKind::XPath, raw.clone())
    } else if let Some(rest) = raw.strip_prefix("text=") {
        (SelectorKind::Text, unquote(rest).to_string())
    } else if let Some(rest) = raw.strip_prefix("css=") {
        (SelectorKind::Css, rest.to_string())
    } else {
        (SelectorKind::Css, raw.clone())
    };

    if query.trim().is_empty() {
        return Err(LocatorError::InvalidSelector(format!(
            "'{raw}' has an empty query"
        )));
    }

    Ok(SelectorPart {
        kind,
        query: query.trim().to_string(),
        raw,
    })
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Splits on `>>` outside quotes and brackets.
fn split_hops(input: &str) -> Vec<String> {
    let mut hops = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => {
                if ch == '\\' {
                    current.push(ch);
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                    continue;
                }
                if ch == q {
                    quote = None;
                }
                current.push(ch);
            }
            None => match ch {
                '"' | '\'' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '[' | '(' => {
                    depth += 1;
                    current.push(ch);
                }
                ']' | ')' => {
                    depth = depth.saturating_sub(1);
                    current.push(ch);
                }
                '>' if depth == 0 && chars.peek() == Some(&'>') => {
                    chars.next();
                    hops.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            },
        }
    }
    hops.push(current);
    hops
}
