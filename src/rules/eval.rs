//! Rule evaluation against a parsed document or a subtree of it

use regex::RegexBuilder;
use scraper::{ElementRef, Html, Selector};

use super::path::compile_path;
use super::{ExtractionRule, Modifier, RuleError};
use crate::coerce::{coerce, TypedValue};

/// Where a rule is evaluated
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    /// Whole document
    Document(&'a Html),
    /// Descendants of one element (a catalogue item)
    Element(ElementRef<'a>),
}

impl<'a> Scope<'a> {
    /// Element whose text and attributes stand for the scope itself
    pub fn root(&self) -> ElementRef<'a> {
        match *self {
            Scope::Document(document) => document.root_element(),
            Scope::Element(element) => element,
        }
    }

    /// Matches in document order
    pub fn select(&self, selector: &Selector) -> Vec<ElementRef<'a>> {
        match *self {
            Scope::Document(document) => document.select(selector).collect(),
            Scope::Element(element) => element.select(selector).collect(),
        }
    }
}

/// Raw result of a rule, before coercion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Scalar(String),
    List(Vec<String>),
}

impl RawValue {
    /// Scalars go through type inference; lists are kept as strings
    pub fn into_typed(self) -> TypedValue {
        match self {
            RawValue::Scalar(raw) => coerce(&raw),
            RawValue::List(items) => TypedValue::from_list(items),
        }
    }
}

/// Evaluate a rule. `Ok(None)` means nothing matched.
pub fn evaluate(rule: &ExtractionRule, scope: Scope<'_>) -> Result<Option<RawValue>, RuleError> {
    match rule {
        ExtractionRule::Selector { selector } => {
            let selector = compile_selector(selector)?;
            let matches = scope.select(&selector);
            Ok(join_matches(matches.iter().map(node_text)))
        }
        ExtractionRule::Path { path } => {
            let compiled = compile_path(path)?;
            Ok(join_matches(compiled.values(scope)))
        }
        ExtractionRule::Pattern { pattern } => match_pattern(pattern, &node_text(&scope.root())),
        ExtractionRule::Chained {
            base_selector,
            modifiers,
        } => evaluate_chained(base_selector, modifiers, scope),
    }
}

impl ExtractionRule {
    /// Compile every part of the rule without evaluating it
    pub fn check(&self) -> Result<(), RuleError> {
        match self {
            ExtractionRule::Selector { selector } => compile_selector(selector).map(|_| ()),
            ExtractionRule::Path { path } => compile_path(path).map(|_| ()),
            ExtractionRule::Pattern { pattern } => compile_pattern(pattern).map(|_| ()),
            ExtractionRule::Chained {
                base_selector,
                modifiers,
            } => {
                if !base_selector.is_empty() {
                    compile_selector(base_selector)?;
                }
                match modifiers.iter().find_map(|m| match m {
                    Modifier::Unrecognized(token) => Some(token),
                    _ => None,
                }) {
                    Some(token) => Err(RuleError::UnknownModifier(token.clone())),
                    None => Ok(()),
                }
            }
        }
    }
}

pub(crate) fn compile_selector(selector: &str) -> Result<Selector, RuleError> {
    Selector::parse(selector).map_err(|e| RuleError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn compile_pattern(pattern: &str) -> Result<regex::Regex, RuleError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| RuleError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// Text content with whitespace runs collapsed
pub(crate) fn node_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Several matches collapse into one comma-joined scalar
fn join_matches(values: impl IntoIterator<Item = String>) -> Option<RawValue> {
    let values: Vec<String> = values.into_iter().filter(|v| !v.is_empty()).collect();
    if values.is_empty() {
        None
    } else {
        Some(RawValue::Scalar(values.join(", ")))
    }
}

fn match_pattern(pattern: &str, text: &str) -> Result<Option<RawValue>, RuleError> {
    let re = compile_pattern(pattern)?;
    let value = re.captures(text).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().trim().to_string())
    });
    Ok(value.filter(|v| !v.is_empty()).map(RawValue::Scalar))
}

/// What a chained rule reads from each matched node
enum Read<'r> {
    Text,
    Attr(&'r str),
}

impl Read<'_> {
    fn apply(&self, element: &ElementRef<'_>) -> Option<String> {
        let value = match self {
            Read::Text => node_text(element),
            Read::Attr(name) => element.value().attr(name)?.trim().to_string(),
        };
        (!value.is_empty()).then_some(value)
    }
}

fn evaluate_chained(
    base_selector: &str,
    modifiers: &[Modifier],
    scope: Scope<'_>,
) -> Result<Option<RawValue>, RuleError> {
    // `::attr(href)` with no selector reads the scope element itself
    let matches = if base_selector.is_empty() {
        vec![scope.root()]
    } else {
        scope.select(&compile_selector(base_selector)?)
    };

    let mut read = Read::Text;
    let mut collect_all = false;

    for modifier in modifiers {
        match modifier {
            Modifier::Text => read = Read::Text,
            Modifier::Attr { name } => read = Read::Attr(name),
            Modifier::All => collect_all = true,
            Modifier::Exists => {
                return Ok(Some(RawValue::Scalar((!matches.is_empty()).to_string())));
            }
            Modifier::Unrecognized(token) => {
                return Err(RuleError::UnknownModifier(token.clone()));
            }
        }
    }

    if collect_all {
        let values: Vec<String> = matches.iter().filter_map(|el| read.apply(el)).collect();
        return Ok((!values.is_empty()).then_some(RawValue::List(values)));
    }

    Ok(matches
        .first()
        .and_then(|el| read.apply(el))
        .map(RawValue::Scalar))
}
