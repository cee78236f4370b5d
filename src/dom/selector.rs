//! Compact selector compiler.
//!
//! Supports compound simple selectors (`tag`, `#id`, `.class`, `[attr]`,
//! `[attr=value]`) and comma-separated alternation. No combinators: the
//! engine matches nodes, not paths, and watchers that need structure test
//! it in their own predicate.

use smallvec::SmallVec;

use super::{Document, Matcher, NodeId};
use crate::error::SelectorError;

/// One compound: every listed test must hold on the same node.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: SmallVec<[String; 2]>,
    attrs: SmallVec<[(String, Option<String>); 2]>,
}

/// A parsed selector: alternation over compounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    alternatives: Vec<Compound>,
    source: String,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let mut alternatives = Vec::new();
        for part in source.split(',') {
            alternatives.push(parse_compound(part.trim(), source)?);
        }
        if alternatives.is_empty() {
            return Err(SelectorError::Empty);
        }
        Ok(Self {
            alternatives,
            source: source.to_string(),
        })
    }

    /// The original selector text; doubles as a watch identity where the
    /// caller supplies no explicit one.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(n) = doc.get(node) else {
            return false;
        };
        self.alternatives.iter().any(|compound| {
            if let Some(tag) = &compound.tag
                && n.tag() != tag
            {
                return false;
            }
            if let Some(id) = &compound.id
                && n.attr("id") != Some(id.as_str())
            {
                return false;
            }
            for class in &compound.classes {
                let listed = n
                    .attr("class")
                    .is_some_and(|v| v.split_whitespace().any(|c| c == class));
                if !listed {
                    return false;
                }
            }
            for (name, expected) in &compound.attrs {
                match (n.attr(name), expected) {
                    (None, _) => return false,
                    (Some(actual), Some(expected)) if actual != expected => return false,
                    _ => {}
                }
            }
            true
        })
    }

    /// Compile into the boxed predicate form the watch registry takes.
    pub fn matcher(self) -> Matcher {
        Box::new(move |doc, node| self.matches(doc, node))
    }
}

fn parse_compound(part: &str, source: &str) -> Result<Compound, SelectorError> {
    if part.is_empty() {
        return Err(SelectorError::Empty);
    }
    let mut compound = Compound::default();
    let mut chars = part.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        match ch {
            '#' => {
                chars.next();
                compound.id = Some(take_name(&mut chars, offset, ch)?);
            }
            '.' => {
                chars.next();
                compound.classes.push(take_name(&mut chars, offset, ch)?);
            }
            '[' => {
                chars.next();
                compound.attrs.push(take_attr(&mut chars)?);
            }
            c if is_name_char(c) => {
                compound.tag = Some(take_name(&mut chars, offset, ch)?);
            }
            c => {
                crate::debug!("watch"; "selector `{}` rejected at {}", source, offset);
                return Err(SelectorError::Unexpected { ch: c, offset });
            }
        }
    }
    Ok(compound)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn take_name(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    offset: usize,
    prefix: char,
) -> Result<String, SelectorError> {
    let mut name = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if !is_name_char(c) {
            break;
        }
        name.push(c);
        chars.next();
    }
    if name.is_empty() {
        return Err(SelectorError::Unexpected { ch: prefix, offset });
    }
    Ok(name)
}

fn take_attr(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) -> Result<(String, Option<String>), SelectorError> {
    let mut name = String::new();
    let mut value: Option<String> = None;

    for (_, c) in chars.by_ref() {
        match c {
            ']' => {
                if name.is_empty() {
                    return Err(SelectorError::UnterminatedAttr);
                }
                return Ok((name, value));
            }
            '=' => value = Some(String::new()),
            c => match &mut value {
                Some(v) => v.push(c),
                None => name.push(c),
            },
        }
    }
    Err(SelectorError::UnterminatedAttr)
}
