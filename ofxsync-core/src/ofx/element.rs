//! Request element tree and its serializer

/// Line terminator used throughout OFX 1.x documents
pub const CRLF: &str = "\r\n";

/// One node of a request document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// `<TAG>value`, never closed
    Leaf { tag: String, value: String },
    /// `<TAG>` children `</TAG>`
    Aggregate { tag: String, children: Vec<Element> },
}

impl Element {
    pub fn leaf(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Element::Leaf {
            tag: tag.into(),
            value: value.into(),
        }
    }

    pub fn aggregate(tag: impl Into<String>, children: Vec<Element>) -> Self {
        Element::Aggregate {
            tag: tag.into(),
            children,
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Element::Leaf { tag, .. } | Element::Aggregate { tag, .. } => tag,
        }
    }

    /// Serialize to SGML lines joined by CRLF
    ///
    /// Values are written as-is: OFX 1.x institutions do not agree on escaping.
    pub fn serialize(&self) -> String {
        let mut lines = Vec::new();
        self.write_lines(&mut lines);
        lines.join(CRLF)
    }

    fn write_lines(&self, lines: &mut Vec<String>) {
        match self {
            Element::Leaf { tag, value } => lines.push(format!("<{}>{}", tag, value)),
            Element::Aggregate { tag, children } => {
                lines.push(format!("<{}>", tag));
                for child in children {
                    child.write_lines(lines);
                }
                lines.push(format!("</{}>", tag));
            }
        }
    }
}
