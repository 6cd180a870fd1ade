//! JSX to factory-call transform
//!
//! A single-pass source rewriter. Plain JavaScript is copied through
//! unchanged; a `<` in expression position that is followed by a name or `>`
//! starts a JSX element, which is emitted as a factory call:
//!
//! ```text
//! <div class="x">hi {name}</div>  ->  JSX.createElement("div", {"class": "x"}, "hi ", name)
//! <>A <b /></>                    ->  JSX.createElement(JSX.Fragment, null, "A ", JSX.createElement("b", null))
//! <Item {...p} done />            ->  JSX.createElement(Item, Object.assign({}, p, {"done": true}))
//! ```
//!
//! Lower-case names (and names containing `-` or `:`) are intrinsic tags and
//! become strings; everything else is a reference. Strings, template literals
//! (including nested `${}`), comments and regular expressions are skipped
//! over so their contents never start JSX.

use serde_json::Value as Json;

use super::Transformer;
use crate::config::JsxOptions;
use crate::error::CompileError;

/// Keywords after which an expression (and therefore JSX or a regex) may follow
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return",
    "typeof",
    "instanceof",
    "in",
    "of",
    "new",
    "delete",
    "void",
    "throw",
    "case",
    "do",
    "else",
    "yield",
    "await",
];

/// The default [`Transformer`]: JSX in expression position to factory calls
#[derive(Debug, Clone, Default)]
pub struct JsxTransformer {
    options: JsxOptions,
}

impl JsxTransformer {
    pub fn new(options: JsxOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &JsxOptions {
        &self.options
    }
}

impl Transformer for JsxTransformer {
    fn transform(&self, source: &str) -> Result<String, CompileError> {
        Scanner {
            src: source,
            pos: 0,
            options: &self.options,
        }
        .parse_js(false)
    }
}

enum PropsPart {
    Fields(Vec<(String, String)>),
    Spread(String),
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    options: &'a JsxOptions,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char, context: &str) -> Result<(), CompileError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(syntax(format!("expected '{}' {}", expected, context), self.pos))
        }
    }

    fn take_while(&mut self, keep: impl Fn(char) -> bool) -> &'a str {
        let src = self.src;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !keep(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &src[start..self.pos]
    }

    fn skip_whitespace(&mut self) {
        self.take_while(char::is_whitespace);
    }

    // ------------------------------------------------------------------------
    // JavaScript
    // ------------------------------------------------------------------------

    /// Copy JavaScript through, rewriting JSX. When `nested`, stops at (and
    /// consumes) the `}` that closes the enclosing `{` or `${`.
    fn parse_js(&mut self, nested: bool) -> Result<String, CompileError> {
        let mut out = String::new();
        let mut brackets: Vec<(char, usize)> = Vec::new();
        let mut expr_allowed = true;

        while let Some(c) = self.peek() {
            let next = self.peek_nth(1);
            match c {
                '"' | '\'' => {
                    out.push_str(self.parse_string_literal(c)?);
                    expr_allowed = false;
                }
                '`' => {
                    let template = self.parse_template()?;
                    out.push_str(&template);
                    expr_allowed = false;
                }
                '/' if next == Some('/') => out.push_str(self.take_while(|c| c != '\n')),
                '/' if next == Some('*') => out.push_str(self.parse_block_comment()?),
                '/' if expr_allowed => {
                    out.push_str(self.parse_regex()?);
                    expr_allowed = false;
                }
                '<' if expr_allowed && next.map_or(false, |n| n == '>' || is_ident_start(n)) => {
                    let element = self.parse_jsx()?;
                    out.push_str(&element);
                    expr_allowed = false;
                }
                '(' | '[' | '{' => {
                    brackets.push((c, self.pos));
                    self.bump();
                    out.push(c);
                    expr_allowed = true;
                }
                ')' | ']' | '}' => {
                    if c == '}' && nested && brackets.is_empty() {
                        self.bump();
                        return Ok(out);
                    }
                    match brackets.pop() {
                        Some((open, _)) if closing_bracket(open) == c => {}
                        Some((open, opened_at)) => {
                            return Err(syntax(
                                format!("'{}' does not close '{}' opened at offset {}", c, open, opened_at),
                                self.pos,
                            ))
                        }
                        None => return Err(syntax(format!("unexpected '{}'", c), self.pos)),
                    }
                    self.bump();
                    out.push(c);
                    expr_allowed = c == '}';
                }
                c if is_ident_start(c) => {
                    let word = self.take_while(is_ident_part);
                    expr_allowed = EXPRESSION_KEYWORDS.contains(&word);
                    out.push_str(word);
                }
                c if c.is_ascii_digit() || (c == '.' && next.map_or(false, |n| n.is_ascii_digit())) => {
                    out.push_str(self.take_while(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_'));
                    expr_allowed = false;
                }
                c if c.is_whitespace() => {
                    self.bump();
                    out.push(c);
                }
                _ => {
                    self.bump();
                    out.push(c);
                    expr_allowed = true;
                }
            }
        }

        if let Some((open, opened_at)) = brackets.pop() {
            return Err(syntax(format!("unclosed '{}'", open), opened_at));
        }
        if nested {
            return Err(syntax("expected '}' before end of input", self.pos));
        }
        Ok(out)
    }

    fn parse_string_literal(&mut self, quote: char) -> Result<&'a str, CompileError> {
        let src = self.src;
        let start = self.pos;
        self.bump();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(syntax("unterminated string literal", start)),
                Some('\\') => {
                    self.bump();
                }
                Some(c) if c == quote => return Ok(&src[start..self.pos]),
                Some(_) => {}
            }
        }
    }

    fn parse_template(&mut self) -> Result<String, CompileError> {
        let start = self.pos;
        let mut out = String::new();
        self.bump();
        out.push('`');
        loop {
            match self.peek() {
                None => return Err(syntax("unterminated template literal", start)),
                Some('\\') => {
                    self.bump();
                    out.push('\\');
                    if let Some(escaped) = self.bump() {
                        out.push(escaped);
                    }
                }
                Some('`') => {
                    self.bump();
                    out.push('`');
                    return Ok(out);
                }
                Some('$') if self.peek_nth(1) == Some('{') => {
                    self.pos += 2;
                    out.push_str("${");
                    let inner = self.parse_js(true)?;
                    out.push_str(&inner);
                    out.push('}');
                }
                Some(c) => {
                    self.bump();
                    out.push(c);
                }
            }
        }
    }

    fn parse_block_comment(&mut self) -> Result<&'a str, CompileError> {
        let src = self.src;
        let start = self.pos;
        match src[start + 2..].find("*/") {
            Some(end) => {
                self.pos = start + 2 + end + 2;
                Ok(&src[start..self.pos])
            }
            None => Err(syntax("unterminated comment", start)),
        }
    }

    fn parse_regex(&mut self) -> Result<&'a str, CompileError> {
        let src = self.src;
        let start = self.pos;
        self.bump();
        let mut in_class = false;
        loop {
            match self.bump() {
                None | Some('\n') => return Err(syntax("unterminated regular expression", start)),
                Some('\\') => {
                    self.bump();
                }
                Some('[') => in_class = true,
                Some(']') => in_class = false,
                Some('/') if !in_class => break,
                Some(_) => {}
            }
        }
        self.take_while(is_ident_part);
        Ok(&src[start..self.pos])
    }

    // ------------------------------------------------------------------------
    // JSX
    // ------------------------------------------------------------------------

    /// Parse a JSX element or fragment starting at `<`
    fn parse_jsx(&mut self) -> Result<String, CompileError> {
        let start = self.pos;
        self.bump();
        self.skip_whitespace();

        if self.eat('>') {
            let children = self.parse_jsx_children(None, start)?;
            return Ok(factory_call(&self.options.factory, &self.options.fragment, "null", &children));
        }

        let name = self.parse_jsx_element_name()?;
        let props = self.parse_jsx_attributes()?;
        self.skip_whitespace();

        if self.eat('/') {
            self.expect('>', "to end self-closing JSX tag")?;
            return Ok(factory_call(&self.options.factory, &jsx_tag(name), &props, &[]));
        }
        self.expect('>', "to end JSX opening tag")?;

        let children = self.parse_jsx_children(Some(name), start)?;
        Ok(factory_call(&self.options.factory, &jsx_tag(name), &props, &children))
    }

    /// Parse an element name: `div`, `x-cell`, `svg:path`, `UI.Button`
    fn parse_jsx_element_name(&mut self) -> Result<&'a str, CompileError> {
        let start = self.pos;
        let name = self.take_while(is_jsx_name_part);
        if name.is_empty() || !name.chars().next().map_or(false, is_ident_start) {
            return Err(syntax("expected JSX element name", start));
        }
        Ok(name)
    }

    /// Parse attributes up to `>` or `/>`, returning the props expression
    fn parse_jsx_attributes(&mut self) -> Result<String, CompileError> {
        let mut parts: Vec<PropsPart> = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(syntax("unterminated JSX tag", self.pos)),
                Some('/') | Some('>') => break,
                Some('{') => {
                    let at = self.pos;
                    self.bump();
                    self.skip_whitespace();
                    if !self.src[self.pos..].starts_with("...") {
                        return Err(syntax("expected '...' in JSX spread attribute", at));
                    }
                    self.pos += 3;
                    let argument = self.parse_js(true)?;
                    parts.push(PropsPart::Spread(argument.trim().to_string()));
                }
                Some(c) if is_ident_start(c) => {
                    let name = self
                        .take_while(|c| is_ident_part(c) || c == '-' || c == ':')
                        .to_string();
                    self.skip_whitespace();
                    let value = if self.eat('=') {
                        self.skip_whitespace();
                        self.parse_jsx_attribute_value()?
                    } else {
                        "true".to_string()
                    };
                    match parts.last_mut() {
                        Some(PropsPart::Fields(fields)) => fields.push((name, value)),
                        _ => parts.push(PropsPart::Fields(vec![(name, value)])),
                    }
                }
                Some(c) => return Err(syntax(format!("unexpected '{}' in JSX tag", c), self.pos)),
            }
        }
        Ok(props_expression(&parts))
    }

    /// Parse `"text"`, `'text'`, `{expression}` or a nested element
    fn parse_jsx_attribute_value(&mut self) -> Result<String, CompileError> {
        let start = self.pos;
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.bump();
                let body = self.take_while(|c| c != quote);
                if !self.eat(quote) {
                    return Err(syntax("unterminated JSX attribute string", start));
                }
                Ok(js_string(&decode_entities(body)))
            }
            Some('{') => {
                self.bump();
                let expression = self.parse_js(true)?;
                if is_blank(&expression) {
                    return Err(syntax("JSX attribute expression must not be empty", start));
                }
                Ok(expression.trim().to_string())
            }
            Some('<') => self.parse_jsx(),
            _ => Err(syntax("expected JSX attribute value after '='", start)),
        }
    }

    /// Parse children up to the closing tag matching `name` (`None` for a
    /// fragment)
    fn parse_jsx_children(&mut self, name: Option<&str>, start: usize) -> Result<Vec<String>, CompileError> {
        let mut children = Vec::new();
        loop {
            match self.peek() {
                None => {
                    let message = match name {
                        Some(name) => format!("unterminated JSX element <{}>", name),
                        None => "unterminated JSX fragment".to_string(),
                    };
                    return Err(syntax(message, start));
                }
                Some('<') => {
                    let at = self.pos;
                    if self.src[at + 1..].trim_start().starts_with('/') {
                        self.parse_jsx_closing_element(name.unwrap_or(""), at)?;
                        return Ok(children);
                    }
                    children.push(self.parse_jsx()?);
                }
                Some('{') => {
                    self.bump();
                    let expression = self.parse_js(true)?;
                    if !is_blank(&expression) {
                        children.push(expression.trim().to_string());
                    }
                }
                Some(_) => {
                    let text = self.take_while(|c| c != '<' && c != '{');
                    if let Some(text) = clean_jsx_text(text) {
                        children.push(js_string(&decode_entities(&text)));
                    }
                }
            }
        }
    }

    /// Parse `</name>` and check it against the opening tag
    fn parse_jsx_closing_element(&mut self, expected: &str, at: usize) -> Result<(), CompileError> {
        self.bump();
        self.skip_whitespace();
        self.bump();
        self.skip_whitespace();
        let found = self.take_while(is_jsx_name_part);
        self.skip_whitespace();
        self.expect('>', "to end JSX closing tag")?;
        if found != expected {
            return Err(syntax(
                format!("expected closing tag </{}>, found </{}>", expected, found),
                at,
            ));
        }
        Ok(())
    }
}

fn syntax(message: impl Into<String>, offset: usize) -> CompileError {
    CompileError::Syntax {
        message: message.into(),
        offset,
    }
}

fn closing_bracket(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn is_jsx_name_part(c: char) -> bool {
    is_ident_part(c) || c == '-' || c == '.' || c == ':'
}

/// Intrinsic tags become strings, components stay references
fn jsx_tag(name: &str) -> String {
    let intrinsic = !name.contains('.')
        && (name.starts_with(|c: char| c.is_lowercase()) || name.contains('-') || name.contains(':'));
    if intrinsic {
        js_string(name)
    } else {
        name.to_string()
    }
}

fn factory_call(factory: &str, tag: &str, props: &str, children: &[String]) -> String {
    let mut call = format!("{}({}, {}", factory, tag, props);
    for child in children {
        call.push_str(", ");
        call.push_str(child);
    }
    call.push(')');
    call
}

fn props_expression(parts: &[PropsPart]) -> String {
    fn object_literal(fields: &[(String, String)]) -> String {
        let entries: Vec<String> = fields
            .iter()
            .map(|(name, value)| format!("{}: {}", js_string(name), value))
            .collect();
        format!("{{{}}}", entries.join(", "))
    }

    match parts {
        [] => "null".to_string(),
        [PropsPart::Fields(fields)] => object_literal(fields),
        parts => {
            let args: Vec<String> = parts
                .iter()
                .map(|part| match part {
                    PropsPart::Fields(fields) => object_literal(fields),
                    PropsPart::Spread(argument) => argument.clone(),
                })
                .collect();
            format!("Object.assign({{}}, {})", args.join(", "))
        }
    }
}

fn js_string(text: &str) -> String {
    Json::String(text.to_string()).to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

/// JSX text whitespace: lines are trimmed where they meet a line break,
/// blank lines dropped, and the rest joined with single spaces
fn clean_jsx_text(raw: &str) -> Option<String> {
    let lines: Vec<String> = raw
        .split('\n')
        .map(|line| line.trim_end_matches('\r').replace('\t', " "))
        .collect();
    let last_content = lines.iter().rposition(|line| !line.trim().is_empty());

    let mut out = String::new();
    for (index, line) in lines.iter().enumerate() {
        let mut trimmed = line.as_str();
        if index > 0 {
            trimmed = trimmed.trim_start_matches(' ');
        }
        if index + 1 < lines.len() {
            trimmed = trimmed.trim_end_matches(' ');
        }
        if trimmed.is_empty() {
            continue;
        }
        out.push_str(trimmed);
        if Some(index) != last_content {
            out.push(' ');
        }
    }
    (!out.is_empty()).then_some(out)
}

/// Whether an expression container holds only whitespace and comments
fn is_blank(expression: &str) -> bool {
    let mut rest = expression.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("//") {
            rest = after.find('\n').map_or("", |end| &after[end..]).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |end| &after[end + 2..]).trim_start();
        } else {
            return rest.is_empty();
        }
    }
}
