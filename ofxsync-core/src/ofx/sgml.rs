//! Forgiving tree builder for OFX 1.x SGML
//!
//! OFX 1.x leaves most leaf elements unclosed, institutions mix case, and some
//! close leaves anyway. The builder never fails: whatever it can make sense of
//! ends up in the tree, and lookups on missing elements return `None`.

/// Element of a parsed response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// Upper-cased tag name (empty for the document root)
    pub tag: String,
    /// Trimmed text of a leaf element
    pub text: Option<String>,
    pub children: Vec<Node>,
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Open(String),
    Close(String),
    Text(String),
}

impl Node {
    fn aggregate(tag: String) -> Self {
        Node {
            tag,
            ..Default::default()
        }
    }

    /// Parse a response body into a tree rooted at an unnamed node
    pub fn parse(input: &str) -> Node {
        let tokens = tokenize(input);
        let mut stack = vec![Node::default()];
        let mut i = 0;

        while i < tokens.len() {
            match &tokens[i] {
                Token::Open(tag) => {
                    let leaf_text = match tokens.get(i + 1) {
                        Some(Token::Text(text)) if !text.trim().is_empty() => Some(text.trim()),
                        _ => None,
                    };

                    match leaf_text {
                        Some(text) => {
                            let leaf = Node {
                                tag: tag.clone(),
                                text: Some(decode_entities(text)),
                                children: Vec::new(),
                            };
                            i += 1;
                            let closed = matches!(
                                tokens.get(i + 1),
                                Some(Token::Close(close)) if close == tag
                            );
                            if closed {
                                i += 1;
                            }
                            push_child(&mut stack, leaf);
                        }
                        None => stack.push(Node::aggregate(tag.clone())),
                    }
                }
                Token::Close(tag) => {
                    // index 0 is the root and never matches
                    if let Some(pos) = stack.iter().rposition(|n| &n.tag == tag) {
                        if pos > 0 {
                            while stack.len() > pos {
                                close_top(&mut stack);
                            }
                        }
                    }
                }
                Token::Text(_) => {}
            }
            i += 1;
        }

        while stack.len() > 1 {
            close_top(&mut stack);
        }
        stack.pop().unwrap_or_default()
    }

    /// Leaf text, if any
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// First direct child with this tag
    pub fn child(&self, tag: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.tag.eq_ignore_ascii_case(tag))
    }

    /// First descendant with this tag, in document order
    pub fn find(&self, tag: &str) -> Option<&Node> {
        for child in &self.children {
            if child.tag.eq_ignore_ascii_case(tag) {
                return Some(child);
            }
            if let Some(found) = child.find(tag) {
                return Some(found);
            }
        }
        None
    }

    /// Every descendant with this tag, in document order
    pub fn find_all(&self, tag: &str) -> Vec<&Node> {
        let mut found = Vec::new();
        self.collect(tag, &mut found);
        found
    }

    fn collect<'a>(&'a self, tag: &str, found: &mut Vec<&'a Node>) {
        for child in &self.children {
            if child.tag.eq_ignore_ascii_case(tag) {
                found.push(child);
            }
            child.collect(tag, found);
        }
    }

    /// Text of the first descendant with this tag
    pub fn find_text(&self, tag: &str) -> Option<&str> {
        self.find(tag).and_then(Node::text)
    }
}

fn push_child(stack: &mut [Node], node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

fn close_top(stack: &mut Vec<Node>) {
    if let Some(node) = stack.pop() {
        push_child(stack, node);
    }
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        let Some(start) = rest.find('<') else {
            tokens.push(Token::Text(rest.to_string()));
            break;
        };
        if start > 0 {
            tokens.push(Token::Text(rest[..start].to_string()));
        }

        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            // unterminated tag: keep it as text
            tokens.push(Token::Text(rest[start..].to_string()));
            break;
        };

        let inner = after[..end].trim();
        rest = &after[end + 1..];

        if inner.starts_with('?') || inner.starts_with('!') {
            continue;
        }
        if let Some(name) = inner.strip_prefix('/') {
            let name = tag_name(name);
            if !name.is_empty() {
                tokens.push(Token::Close(name));
            }
        } else {
            let name = tag_name(inner.trim_end_matches('/'));
            if !name.is_empty() {
                tokens.push(Token::Open(name));
            }
        }
    }

    tokens
}

fn tag_name(raw: &str) -> String {
    raw.trim()
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
