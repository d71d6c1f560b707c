//! Brace-placeholder query templates.
//!
//! A template names exactly one placeholder (`parameters` or `optionals`).
//! `{name}` expands to every literal joined by `", "`, `{name[N]}` to the
//! N-th literal, and `{{`/`}}` are literal braces. Rendering is a pure
//! function of the template and the literal list; literals are inserted
//! verbatim, so callers must only pass values produced by
//! [`crate::time::sql_literal`].

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unterminated placeholder starting at byte {0}")]
    Unterminated(usize),

    #[error("unmatched '}}' at byte {0}")]
    UnmatchedClose(usize),

    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),

    #[error("placeholder index {index} exceeds the {available} available value(s)")]
    IndexOutOfRange { index: usize, available: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    All,
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    placeholder: &'static str,
    segments: Vec<Segment>,
}

impl QueryTemplate {
    pub fn parse(source: &str, placeholder: &'static str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, ch)) = chars.next() {
            match ch {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(TemplateError::UnmatchedClose(pos)),
                '{' => {
                    let mut inner = String::new();
                    let mut closed = false;
                    for (_, next) in chars.by_ref() {
                        if next == '}' {
                            closed = true;
                            break;
                        }
                        inner.push(next);
                    }
                    if !closed {
                        return Err(TemplateError::Unterminated(pos));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(parse_placeholder(inner.trim(), placeholder)?);
                }
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            placeholder,
            segments,
        })
    }

    pub fn placeholder(&self) -> &'static str {
        self.placeholder
    }

    pub fn has_placeholder(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| !matches!(segment, Segment::Literal(_)))
    }

    /// Highest `{name[N]}` index used, if any.
    pub fn max_index(&self) -> Option<usize> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Index(index) => Some(*index),
                _ => None,
            })
            .max()
    }

    pub fn render(&self, values: &[String]) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::All => out.push_str(&values.join(", ")),
                Segment::Index(index) => {
                    let value = values.get(*index).ok_or(TemplateError::IndexOutOfRange {
                        index: *index,
                        available: values.len(),
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

fn parse_placeholder(inner: &str, placeholder: &str) -> Result<Segment, TemplateError> {
    if inner == placeholder {
        return Ok(Segment::All);
    }

    inner
        .strip_prefix(placeholder)
        .and_then(|rest| rest.strip_prefix('['))
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|digits| digits.trim().parse::<usize>().ok())
        .map(Segment::Index)
        .ok_or_else(|| TemplateError::UnknownPlaceholder(inner.to_string()))
}
