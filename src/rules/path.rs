//! Path queries
//!
//! Supports the XPath subset that site profiles actually use and compiles it
//! to a CSS selector over the same tree:
//!
//! - `//div//span`, `//ul/li` - descendant and child steps, `*` node test
//! - `[@href]`, `[@class='x']`, `[@id!='x']`, `[contains(@class,'x')]`,
//!   `[starts-with(@href,'https')]`, `[2]`, `[last()]`, joined with `and`
//! - `[text()='x']`, `[contains(text(),'x')]`, `[normalize-space()='x']`
//!   on the last step
//! - trailing `/@attr` or `/text()`
//!
//! Queries are relative to the scope they run in: inside a catalogue item
//! `//span` only sees that item's descendants.

use scraper::{ElementRef, Selector};

use super::eval::{node_text, Scope};
use super::RuleError;

/// Path query compiled to a selector plus post-filters
#[derive(Debug)]
pub struct CompiledPath {
    selector: Selector,
    text_filters: Vec<TextFilter>,
    output: PathOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TextFilter {
    Equals(String),
    Contains(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathOutput {
    Text,
    Attr(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

impl CompiledPath {
    /// Values of every matched node, in document order
    pub fn values(&self, scope: Scope<'_>) -> Vec<String> {
        scope
            .select(&self.selector)
            .into_iter()
            .filter(|el| self.keeps(el))
            .filter_map(|el| match &self.output {
                PathOutput::Text => Some(node_text(&el)),
                PathOutput::Attr(name) => el.value().attr(name).map(|v| v.trim().to_string()),
            })
            .collect()
    }

    fn keeps(&self, el: &ElementRef<'_>) -> bool {
        if self.text_filters.is_empty() {
            return true;
        }
        let text = node_text(el);
        self.text_filters.iter().all(|filter| match filter {
            TextFilter::Equals(expected) => text == *expected,
            TextFilter::Contains(needle) => text.contains(needle.as_str()),
        })
    }
}

/// Compile a path query
pub fn compile_path(path: &str) -> Result<CompiledPath, RuleError> {
    let fail = |reason: &str| RuleError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let body = path
        .trim()
        .strip_prefix("//")
        .ok_or_else(|| fail("path must start with //"))?;

    let mut steps = split_steps(body).map_err(fail)?;

    let mut output = PathOutput::Text;
    match steps.last().map(|(_, step)| *step) {
        Some("text()") => {
            steps.pop();
        }
        Some(step) if step.starts_with('@') => {
            let name = &step[1..];
            if !is_name(name) {
                return Err(fail("invalid attribute name"));
            }
            output = PathOutput::Attr(name.to_string());
            let axis = steps.pop().map(|(axis, _)| axis).unwrap_or(Axis::Descendant);
            if steps.is_empty() {
                // `//@href`: any element carrying the attribute
                steps.push((axis, "*"));
            }
        }
        _ => {}
    }

    if steps.is_empty() {
        return Err(fail("path selects no elements"));
    }

    let last = steps.len() - 1;
    let mut css = String::new();
    let mut text_filters = Vec::new();

    for (index, (axis, step)) in steps.iter().enumerate() {
        let (step_css, filters) = compile_step(step).map_err(|reason| fail(&reason))?;
        if !filters.is_empty() && index != last {
            return Err(fail("text predicates are only supported on the last step"));
        }
        text_filters.extend(filters);

        if index > 0 {
            css.push_str(match axis {
                Axis::Child => " > ",
                Axis::Descendant => " ",
            });
        }
        css.push_str(&step_css);
    }

    let selector = Selector::parse(&css).map_err(|e| fail(&e.to_string()))?;

    Ok(CompiledPath {
        selector,
        text_filters,
        output,
    })
}

/// Split on `/` outside predicates and string literals
fn split_steps(body: &str) -> Result<Vec<(Axis, &str)>, &'static str> {
    let mut steps = Vec::new();
    let mut axis = Axis::Descendant;
    let mut start = 0;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut pending_descendant = true;

    for (i, c) in body.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '[' => depth += 1,
                ']' => depth = depth.checked_sub(1).ok_or("unbalanced ]")?,
                '/' if depth == 0 => {
                    let segment = &body[start..i];
                    if segment.is_empty() {
                        if pending_descendant {
                            return Err("empty step");
                        }
                        axis = Axis::Descendant;
                        pending_descendant = true;
                    } else {
                        steps.push((axis, segment));
                        axis = Axis::Child;
                        pending_descendant = false;
                    }
                    start = i + 1;
                }
                _ => {}
            },
        }
    }

    if quote.is_some() {
        return Err("unterminated string literal");
    }
    if depth != 0 {
        return Err("unterminated predicate");
    }

    let tail = &body[start..];
    if tail.is_empty() {
        return Err("path ends with /");
    }
    steps.push((axis, tail));

    Ok(steps)
}

/// One step (`li[@class='x'][2]`) to a compound CSS selector
fn compile_step(step: &str) -> Result<(String, Vec<TextFilter>), String> {
    if step == "." || step == ".." || step.contains("::") {
        return Err(format!("axis step `{step}` is not supported"));
    }

    let name_end = step.find('[').unwrap_or(step.len());
    let name = &step[..name_end];
    let any = name == "*";
    if !any && !is_name(name) {
        return Err(format!("invalid node test `{name}`"));
    }

    let mut css = if any { String::new() } else { name.to_string() };
    let mut filters = Vec::new();

    let mut rest = &step[name_end..];
    while !rest.is_empty() {
        let close = predicate_end(rest).ok_or("unterminated predicate")?;
        let predicate = &rest[1..close];
        for term in split_top_level(predicate, " and ") {
            compile_predicate(term.trim(), any, &mut css, &mut filters)?;
        }
        rest = &rest[close + 1..];
    }

    if css.is_empty() {
        css.push('*');
    }

    Ok((css, filters))
}

/// Index of the `]` closing the predicate that `rest` starts with
fn predicate_end(rest: &str) -> Option<usize> {
    if !rest.starts_with('[') {
        return None;
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in rest.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

fn compile_predicate(
    term: &str,
    any: bool,
    css: &mut String,
    filters: &mut Vec<TextFilter>,
) -> Result<(), String> {
    if let Ok(n) = term.parse::<usize>() {
        if n == 0 {
            return Err("positions start at 1".to_string());
        }
        let pseudo = if any { "nth-child" } else { "nth-of-type" };
        css.push_str(&format!(":{pseudo}({n})"));
        return Ok(());
    }

    if term == "last()" {
        css.push_str(if any { ":last-child" } else { ":last-of-type" });
        return Ok(());
    }

    if let Some((target, needle)) = function_call(term, "contains") {
        let needle = string_literal(needle).ok_or("contains() needs a string literal")?;
        match target {
            "text()" | "." => filters.push(TextFilter::Contains(collapse(needle))),
            attr if attr.starts_with('@') => {
                push_attr(css, &attr[1..], "*=", needle)?;
            }
            _ => return Err(format!("unsupported contains() target `{target}`")),
        }
        return Ok(());
    }

    if let Some((target, prefix)) = function_call(term, "starts-with") {
        let prefix = string_literal(prefix).ok_or("starts-with() needs a string literal")?;
        let attr = target
            .strip_prefix('@')
            .ok_or("starts-with() only supports attributes")?;
        return push_attr(css, attr, "^=", prefix);
    }

    if let Some(name) = term.strip_prefix('@') {
        if let Some((attr, value)) = name.split_once("!=") {
            let value = string_literal(value.trim()).ok_or("expected a string literal")?;
            let attr = attr.trim();
            if !is_name(attr) {
                return Err(format!("invalid attribute name `{attr}`"));
            }
            css.push_str(&format!(":not([{attr}=\"{}\"])", escape(value)));
            return Ok(());
        }
        if let Some((attr, value)) = name.split_once('=') {
            let value = string_literal(value.trim()).ok_or("expected a string literal")?;
            return push_attr(css, attr.trim(), "=", value);
        }
        if !is_name(name) {
            return Err(format!("invalid attribute name `{name}`"));
        }
        css.push_str(&format!("[{name}]"));
        return Ok(());
    }

    if let Some((lhs, value)) = term.split_once('=') {
        let value = string_literal(value.trim()).ok_or("expected a string literal")?;
        return match lhs.trim() {
            "text()" | "." | "normalize-space()" | "normalize-space(.)"
            | "normalize-space(text())" => {
                filters.push(TextFilter::Equals(collapse(value)));
                Ok(())
            }
            other => Err(format!("unsupported comparison on `{other}`")),
        };
    }

    Err(format!("unsupported predicate `{term}`"))
}

fn push_attr(css: &mut String, attr: &str, op: &str, value: &str) -> Result<(), String> {
    if !is_name(attr) {
        return Err(format!("invalid attribute name `{attr}`"));
    }
    css.push_str(&format!("[{attr}{op}\"{}\"]", escape(value)));
    Ok(())
}

/// `contains(@class, 'x')` -> `("@class", "'x'")`
fn function_call<'a>(term: &'a str, name: &str) -> Option<(&'a str, &'a str)> {
    let args = term
        .strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')?;
    let mut parts = split_top_level(args, ",").into_iter();
    let first = parts.next()?.trim();
    let second = parts.next()?.trim();
    if parts.next().is_some() {
        return None;
    }
    Some((first, second))
}

fn string_literal(s: &str) -> Option<&str> {
    let quote = s.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = s.strip_prefix(quote)?.strip_suffix(quote)?;
    (!inner.contains(quote)).then_some(inner)
}

/// Split on `sep` where it occurs outside quotes and parentheses
fn split_top_level<'a>(s: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                _ if depth == 0 && i >= start && s[i..].starts_with(sep) => {
                    parts.push(&s[start..i]);
                    start = i + sep.len();
                }
                _ => {}
            },
        }
    }
    parts.push(&s[start..]);
    parts
}

fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn collapse(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
