//! YAML frontmatter and Dataview-style inline properties.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_yaml::{Mapping, Value};

/// Location of a frontmatter block within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontmatterSpan<'a> {
    /// YAML between the delimiters.
    pub yaml: &'a str,
    /// Byte offset where the body starts (after the closing delimiter line).
    pub body_start: usize,
}

/// Find a `---` ... `---` (or `...`) block at the very top of `content`.
pub fn split_frontmatter(content: &str) -> Option<FrontmatterSpan<'_>> {
    let bom = if content.starts_with('\u{feff}') { '\u{feff}'.len_utf8() } else { 0 };
    let mut lines = content[bom..].split_inclusive('\n');
    let first = lines.next()?;
    if first.trim_end() != "---" {
        return None;
    }

    let yaml_start = bom + first.len();
    let mut offset = yaml_start;
    for line in lines {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            return Some(FrontmatterSpan {
                yaml: &content[yaml_start..offset],
                body_start: offset + line.len(),
            });
        }
        offset += line.len();
    }
    None
}

/// The document text after any frontmatter block.
pub fn body(content: &str) -> &str {
    match split_frontmatter(content) {
        Some(span) => &content[span.body_start..],
        None => content,
    }
}

/// Shape of a frontmatter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "shape", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    Scalar(String),
    List(Vec<PropertyValue>),
    Mapping(BTreeMap<String, PropertyValue>),
    Unknown,
}

impl PropertyValue {
    /// Every scalar reachable through lists, in order. Mappings contribute
    /// nothing.
    pub fn flatten(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_scalars(&mut out);
        out
    }

    fn collect_scalars<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            PropertyValue::Scalar(s) => out.push(s),
            PropertyValue::List(items) => {
                for item in items {
                    item.collect_scalars(out);
                }
            }
            PropertyValue::Mapping(_) | PropertyValue::Unknown => {}
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Tagged(tagged) => scalar_text(&tagged.value),
        _ => None,
    }
}

/// The single place YAML values are sorted into shapes.
pub fn classify(value: &Value) -> PropertyValue {
    match value {
        Value::Sequence(items) => PropertyValue::List(items.iter().map(classify).collect()),
        Value::Mapping(map) => PropertyValue::Mapping(
            map.iter()
                .filter_map(|(k, v)| Some((scalar_text(k)?, classify(v))))
                .collect(),
        ),
        Value::Tagged(tagged) => classify(&tagged.value),
        Value::Null => PropertyValue::Unknown,
        other => scalar_text(other).map_or(PropertyValue::Unknown, PropertyValue::Scalar),
    }
}

/// Parsed frontmatter: key -> classified value, keys as written.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Raw YAML mapping of the frontmatter, if present and well-formed.
pub fn parse_mapping(content: &str) -> Option<Mapping> {
    let span = split_frontmatter(content)?;
    match serde_yaml::from_str::<Value>(span.yaml).ok()? {
        Value::Mapping(map) => Some(map),
        _ => None,
    }
}

/// Frontmatter properties. Malformed YAML reads as no frontmatter.
pub fn parse_properties(content: &str) -> Properties {
    parse_mapping(content)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| Some((scalar_text(k)?, classify(v))))
                .collect()
        })
        .unwrap_or_default()
}

/// Values of every property whose key equals `key` ignoring case.
pub fn lookup<'a>(props: &'a Properties, key: &'a str) -> impl Iterator<Item = &'a PropertyValue> {
    props
        .iter()
        .filter(move |(k, _)| k.to_lowercase() == key.to_lowercase())
        .map(|(_, v)| v)
}

/// Rewrite the frontmatter mapping in place. `edit` returns whether it
/// changed anything; unchanged documents yield `None`.
pub fn rewrite_mapping<F>(content: &str, edit: F) -> Option<String>
where
    F: FnOnce(&mut Mapping) -> bool,
{
    let span = split_frontmatter(content)?;
    let mut map = match serde_yaml::from_str::<Value>(span.yaml).ok()? {
        Value::Mapping(map) => map,
        Value::Null => Mapping::new(),
        _ => return None,
    };
    if !edit(&mut map) {
        return None;
    }
    Some(format!("---\n{}---\n{}", render_mapping(&map)?, &content[span.body_start..]))
}

/// Like [`rewrite_mapping`], but a document without frontmatter gets a new
/// block when `edit` adds something.
pub fn upsert_mapping<F>(content: &str, edit: F) -> Option<String>
where
    F: FnOnce(&mut Mapping) -> bool,
{
    if split_frontmatter(content).is_some() {
        return rewrite_mapping(content, edit);
    }
    let mut map = Mapping::new();
    if !edit(&mut map) || map.is_empty() {
        return None;
    }
    Some(format!("---\n{}---\n{}", render_mapping(&map)?, content))
}

fn render_mapping(map: &Mapping) -> Option<String> {
    if map.is_empty() {
        return Some(String::new());
    }
    serde_yaml::to_string(map).ok()
}

/// Lowercase, trim, unwrap `[[...]]` and drop any `|alias`.
pub fn normalize_property_value(value: &str) -> String {
    let mut v = value.trim().to_lowercase();
    if let Some(inner) = v.strip_prefix("[[").and_then(|s| s.strip_suffix("]]")) {
        v = inner.to_string();
    }
    if let Some(pos) = v.find('|') {
        v.truncate(pos);
    }
    v.trim().to_string()
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

fn is_structural_line(trimmed: &str) -> bool {
    if trimmed.starts_with('#') || trimmed.starts_with('|') || trimmed.starts_with('>') {
        return true;
    }
    if trimmed.starts_with("- ") || trimmed.starts_with("* ") || trimmed.starts_with("+ ") {
        return true;
    }
    // "1. item" / "12) item"
    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && matches!(trimmed[digits..].chars().next(), Some('.') | Some(')'))
}

fn is_inline_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

/// `Key:: Value` lines outside frontmatter and fenced code, keyed by the
/// lowercased key.
pub fn inline_properties(content: &str) -> BTreeMap<String, Vec<String>> {
    let mut props: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut in_fence = false;

    for line in body(content).lines() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || is_structural_line(trimmed) {
            continue;
        }
        let Some((key, value)) = trimmed.split_once("::") else {
            continue;
        };
        let value = value.trim();
        if !is_inline_key(key) || value.is_empty() {
            continue;
        }
        props
            .entry(key.to_lowercase())
            .or_default()
            .push(value.to_string());
    }

    props
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_frontmatter() {
        let doc = "---\ntitle: Hi\n---\n# Body\n";
        let span = split_frontmatter(doc).unwrap();
        assert_eq!(span.yaml, "title: Hi\n");
        assert_eq!(&doc[span.body_start..], "# Body\n");

        // BOM and dotted terminator
        let doc = "\u{feff}---\na: 1\n...\nrest";
        assert_eq!(body(doc), "rest");

        // Unterminated block is not frontmatter
        assert!(split_frontmatter("---\na: 1\nno end").is_none());
        assert!(split_frontmatter("text\n---\na: 1\n---\n").is_none());
    }

    #[test]
    fn test_classify_shapes() {
        let props = parse_properties(
            "---\ntitle: Plan\ncount: 3\ndone: true\ntags: [a, [b, c]]\nmeta:\n  owner: me\nempty:\n---\n",
        );
        assert_eq!(props["title"], PropertyValue::Scalar("Plan".into()));
        assert_eq!(props["count"], PropertyValue::Scalar("3".into()));
        assert_eq!(props["done"], PropertyValue::Scalar("true".into()));
        assert_eq!(props["tags"].flatten(), vec!["a", "b", "c"]);
        assert!(matches!(props["meta"], PropertyValue::Mapping(_)));
        assert!(props["meta"].flatten().is_empty());
        assert_eq!(props["empty"], PropertyValue::Unknown);
    }

    #[test]
    fn test_malformed_yaml_is_no_frontmatter() {
        assert!(parse_properties("---\n: : [\n---\nbody").is_empty());
        assert!(parse_properties("---\n- just\n- a list\n---\n").is_empty());
    }

    #[test]
    fn test_lookup_ignores_case() {
        let props = parse_properties("---\nStatus: Active\n---\n");
        let found: Vec<_> = lookup(&props, "status").collect();
        assert_eq!(found, vec![&PropertyValue::Scalar("Active".into())]);
    }

    #[test]
    fn test_normalize_property_value() {
        assert_eq!(normalize_property_value("  Done "), "done");
        assert_eq!(normalize_property_value("[[Project X|the project]]"), "project x");
        assert_eq!(normalize_property_value("[[People/Ann]]"), "people/ann");
    }

    #[test]
    fn test_inline_properties() {
        let doc = "---\nstatus: x\n---\nstatus:: Active\nOwner:: [[Ann]]\n\
                   - item:: skipped\n# heading:: skipped\n| a:: b |\n\
                   ```\ncode:: skipped\n```\nnot a key:: value\nempty::\n";
        let props = inline_properties(doc);
        assert_eq!(props["status"], vec!["Active"]);
        assert_eq!(props["owner"], vec!["[[Ann]]"]);
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn test_rewrite_mapping() {
        let doc = "---\ntags:\n- a\n- b\n---\nbody\n";
        let out = rewrite_mapping(doc, |map| {
            map.insert(Value::from("tags"), Value::Sequence(vec![Value::from("a")]));
            true
        })
        .unwrap();
        assert_eq!(out, "---\ntags:\n- a\n---\nbody\n");

        assert!(rewrite_mapping(doc, |_| false).is_none());
        assert!(rewrite_mapping("no frontmatter", |_| true).is_none());
    }

    #[test]
    fn test_upsert_mapping_creates_block() {
        let set = |map: &mut Mapping| {
            map.insert(Value::from("status"), Value::from("open"));
            true
        };
        assert_eq!(
            upsert_mapping("# Note\n", set).unwrap(),
            "---\nstatus: open\n---\n# Note\n"
        );
        assert_eq!(
            upsert_mapping("---\n---\nbody", set).unwrap(),
            "---\nstatus: open\n---\nbody"
        );
        assert!(upsert_mapping("# Note\n", |_| true).is_none());
    }
}
