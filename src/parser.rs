// Parser framework shared by the attribute and geometry extractors

use crate::error::{ImportError, Result};
use roxmltree::{Document, Node, ParsingOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Which half of a file pair a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    /// Tabular parcel fields (XML)
    Attribute,
    /// Parcel boundaries (KML)
    Geometry,
}

impl SourceType {
    pub fn name(&self) -> &str {
        match self {
            SourceType::Attribute => "attribute",
            SourceType::Geometry => "geometry",
        }
    }
}

/// Core trait for one kind of source document.
///
/// Implementors only parse text; reading the file and mapping I/O failures
/// is shared through the provided [`SourceParser::parse`].
pub trait SourceParser {
    type Output;

    /// Parse document text. `origin` is only used in error messages.
    fn parse_str(&self, text: &str, origin: &Path) -> Result<Self::Output>;

    fn source_type(&self) -> SourceType;

    /// Parser version (logged with each pair)
    fn version(&self) -> &str {
        "1.0.0"
    }

    fn parse(&self, file_path: &Path) -> Result<Self::Output> {
        let text = fs::read_to_string(file_path).map_err(|source| ImportError::Io {
            path: file_path.to_path_buf(),
            source,
        })?;
        self.parse_str(&text, file_path)
    }
}

// ============================================================================
// XML HELPERS
// ============================================================================

/// Parse an XML document, turning syntax errors into [`ImportError::Parse`].
pub fn parse_document<'a>(text: &'a str, origin: &Path) -> Result<Document<'a>> {
    let mut options = ParsingOptions::default();
    options.allow_dtd = true;

    Document::parse_with_options(text, options).map_err(|e| ImportError::parse(origin, e))
}

/// Element match on local name, so `kml:Placemark` and `Placemark` both hit.
pub fn is_element(node: Node, local_name: &str) -> bool {
    node.is_element() && node.tag_name().name() == local_name
}

/// First direct child element with the given local name.
pub fn child<'a, 'input>(node: Node<'a, 'input>, local_name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| is_element(*n, local_name))
}

/// First descendant element (excluding `node` itself) with the given local name.
pub fn descendant<'a, 'input>(
    node: Node<'a, 'input>,
    local_name: &str,
) -> Option<Node<'a, 'input>> {
    node.descendants()
        .skip(1)
        .find(|n| is_element(*n, local_name))
}

/// Trimmed text of an element; `None` when absent or blank.
pub fn element_text(node: Node) -> Option<String> {
    let text: String = node
        .children()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    let trimmed = text.trim();

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn child_text(node: Node, local_name: &str) -> Option<String> {
    child(node, local_name).and_then(element_text)
}

/// Integer field; unparseable text is treated as absent.
pub fn child_int(node: Node, local_name: &str) -> Option<i64> {
    child_text(node, local_name).and_then(|text| text.parse::<i64>().ok())
}

/// Decimal field; unparseable or non-finite text is treated as absent.
pub fn child_decimal(node: Node, local_name: &str) -> Option<f64> {
    child_text(node, local_name)
        .and_then(|text| text.parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<root xmlns:x="urn:test">
        <x:item>
            <name>  Alpha  </name>
            <blank>   </blank>
            <count> 42 </count>
            <bad_count>4 2</bad_count>
            <ratio>12.50</ratio>
            <nan>NaN</nan>
        </x:item>
    </root>"#;

    #[test]
    fn test_helpers_read_trimmed_values() {
        let doc = parse_document(DOC, Path::new("test.xml")).unwrap();
        let item = descendant(doc.root_element(), "item").unwrap();

        assert_eq!(child_text(item, "name"), Some("Alpha".to_string()));
        assert_eq!(child_text(item, "blank"), None);
        assert_eq!(child_text(item, "missing"), None);
        assert_eq!(child_int(item, "count"), Some(42));
        assert_eq!(child_int(item, "bad_count"), None);
        assert_eq!(child_decimal(item, "ratio"), Some(12.5));
        assert_eq!(child_decimal(item, "nan"), None);
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        let err = parse_document("<root><open></root>", Path::new("broken.xml")).unwrap_err();
        assert!(matches!(err, ImportError::Parse { .. }));
    }

    #[test]
    fn test_source_type_names() {
        assert_eq!(SourceType::Attribute.name(), "attribute");
        assert_eq!(SourceType::Geometry.name(), "geometry");
    }
}
