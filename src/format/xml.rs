//! Minimal XML re-indenter for body display.
//!
//! Checks well-formedness of the element structure (balanced, properly nested
//! tags with a single root) and re-emits every node on its own line with two
//! spaces per nesting level. Entities and namespaces are left untouched.

use thiserror::Error;

const INDENT: &str = "  ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum XmlFormatError {
    #[error("unterminated {0}")]
    Unterminated(&'static str),
    #[error("malformed tag")]
    MalformedTag,
    #[error("unexpected closing tag </{0}>")]
    UnexpectedClose(String),
    #[error("mismatched closing tag: expected </{expected}>, found </{found}>")]
    Mismatched { expected: String, found: String },
    #[error("unclosed element <{0}>")]
    Unclosed(String),
    #[error("text outside the root element")]
    TextOutsideRoot,
    #[error("more than one root element")]
    MultipleRoots,
    #[error("no root element")]
    NoRoot,
}

#[derive(Debug, Clone, Copy)]
enum Token<'a> {
    /// Declarations, processing instructions, comments, doctype and CDATA
    Markup(&'a str),
    Open { name: &'a str, raw: &'a str },
    Close { name: &'a str },
    SelfClosing(&'a str),
    Text(&'a str),
}

/// Re-indent `input`, or explain why it is not well-formed.
pub fn pretty_print(input: &str) -> Result<String, XmlFormatError> {
    let tokens = tokenize(input)?;
    let mut out = String::new();
    let mut stack: Vec<&str> = Vec::new();
    let mut seen_root = false;
    let mut i = 0;

    while i < tokens.len() {
        match tokens[i] {
            Token::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    if stack.is_empty() {
                        return Err(XmlFormatError::TextOutsideRoot);
                    }
                    push_line(&mut out, stack.len(), text);
                }
            }
            Token::Markup(raw) => push_line(&mut out, stack.len(), raw),
            Token::SelfClosing(raw) => {
                enter_root(&stack, &mut seen_root)?;
                push_line(&mut out, stack.len(), raw);
            }
            Token::Open { name, raw } => {
                enter_root(&stack, &mut seen_root)?;
                // <a>text</a> stays on one line
                if let (Some(Token::Text(text)), Some(Token::Close { name: close })) =
                    (tokens.get(i + 1), tokens.get(i + 2))
                {
                    if *close == name {
                        let line = format!("{raw}{}</{name}>", text.trim());
                        push_line(&mut out, stack.len(), &line);
                        i += 3;
                        continue;
                    }
                }
                push_line(&mut out, stack.len(), raw);
                stack.push(name);
            }
            Token::Close { name } => match stack.pop() {
                None => return Err(XmlFormatError::UnexpectedClose(name.to_string())),
                Some(open) if open != name => {
                    return Err(XmlFormatError::Mismatched {
                        expected: open.to_string(),
                        found: name.to_string(),
                    })
                }
                Some(_) => push_line(&mut out, stack.len(), &format!("</{name}>")),
            },
        }
        i += 1;
    }

    if let Some(open) = stack.pop() {
        return Err(XmlFormatError::Unclosed(open.to_string()));
    }
    if !seen_root {
        return Err(XmlFormatError::NoRoot);
    }
    out.truncate(out.trim_end().len());
    Ok(out)
}

fn enter_root(stack: &[&str], seen_root: &mut bool) -> Result<(), XmlFormatError> {
    if stack.is_empty() {
        if *seen_root {
            return Err(XmlFormatError::MultipleRoots);
        }
        *seen_root = true;
    }
    Ok(())
}

fn push_line(out: &mut String, depth: usize, line: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(line);
    out.push('\n');
}

fn tokenize(input: &str) -> Result<Vec<Token<'_>>, XmlFormatError> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        let (token, len) = if rest.starts_with("<!--") {
            let len = delimited(rest, 4, "-->", "comment")?;
            (Token::Markup(&rest[..len]), len)
        } else if rest.starts_with("<![CDATA[") {
            let len = delimited(rest, 9, "]]>", "CDATA section")?;
            (Token::Markup(&rest[..len]), len)
        } else if rest.starts_with("<?") {
            let len = delimited(rest, 2, "?>", "processing instruction")?;
            (Token::Markup(&rest[..len]), len)
        } else if rest.starts_with("<!") {
            let len = delimited(rest, 2, ">", "declaration")?;
            (Token::Markup(&rest[..len]), len)
        } else if rest.starts_with("</") {
            let len = delimited(rest, 2, ">", "closing tag")?;
            let name = rest[2..len - 1].trim();
            if name.is_empty() {
                return Err(XmlFormatError::MalformedTag);
            }
            (Token::Close { name }, len)
        } else if rest.starts_with('<') {
            let len = tag_len(rest)?;
            let raw = &rest[..len];
            let name = tag_name(raw)?;
            if raw.ends_with("/>") {
                (Token::SelfClosing(raw), len)
            } else {
                (Token::Open { name, raw }, len)
            }
        } else {
            let len = rest.find('<').unwrap_or(rest.len());
            (Token::Text(&rest[..len]), len)
        };
        tokens.push(token);
        rest = &rest[len..];
    }
    Ok(tokens)
}

/// Length of the construct starting at `rest`, through its terminator.
fn delimited(
    rest: &str,
    prefix: usize,
    terminator: &str,
    what: &'static str,
) -> Result<usize, XmlFormatError> {
    rest[prefix..]
        .find(terminator)
        .map(|end| prefix + end + terminator.len())
        .ok_or(XmlFormatError::Unterminated(what))
}

// Attribute values may contain '>' inside quotes.
fn tag_len(rest: &str) -> Result<usize, XmlFormatError> {
    let mut quote: Option<char> = None;
    for (idx, ch) in rest.char_indices().skip(1) {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(ch),
            (None, '<') => return Err(XmlFormatError::MalformedTag),
            (None, '>') => return Ok(idx + 1),
            (None, _) => {}
        }
    }
    Err(XmlFormatError::Unterminated("tag"))
}

fn tag_name(raw: &str) -> Result<&str, XmlFormatError> {
    let inner = raw.trim_start_matches('<');
    let end = inner
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(inner.len());
    let name = &inner[..end];
    if name.is_empty() {
        Err(XmlFormatError::MalformedTag)
    } else {
        Ok(name)
    }
}
