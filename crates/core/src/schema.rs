//! Typed view of a JSON-Schema-like settings schema.
//!
//! The settings source hands out plain JSON documents; [`Schema::from_value`]
//! turns one into a [`SchemaNode`] tree that the value tree walks in
//! parallel with the data, using [`FieldPath`] as the synchronization key.
//! Only the subset of JSON Schema that addon settings use is understood:
//! typed nodes, ordered `properties`, `items`, `enum`, numeric bounds, local
//! `$ref`s and a free-form `widget` hint.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::path::{FieldPath, PathSegment, FIELD_ID_SEPARATOR, ROOT_SEGMENT};
use crate::value::SettingValue;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Reference prefixes resolved against the document's own definitions.
const REF_PREFIXES: &[(&str, &str)] = &[("#/definitions/", "definitions"), ("#/$defs/", "$defs")];

/// Guard against pathological nesting in untrusted schema documents.
pub const MAX_SCHEMA_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One selectable option of an enum field.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumOption {
    pub value: SettingValue,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    Object {
        properties: IndexMap<String, SchemaNode>,
    },
    Array {
        items: Box<SchemaNode>,
    },
    String,
    Integer,
    Number,
    Boolean,
    /// Single choice, or a multi-select list when `multiple` is set. A
    /// multi-select is one field even though its value is an array.
    Enum {
        options: Vec<EnumOption>,
        multiple: bool,
    },
    /// No `type` keyword; any value is accepted.
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub kind: SchemaKind,
    pub title: Option<String>,
    pub description: Option<String>,
    pub default: Option<SettingValue>,
    pub widget: Option<String>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub exclusive_maximum: Option<f64>,
}

/// Effective input bounds for a numeric field.
///
/// Integer bounds are always inclusive: `exclusiveMinimum: 4` becomes
/// `min = 5`. Number bounds keep their exclusivity in the flags.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_exclusive: bool,
    pub max_exclusive: bool,
    pub step: Option<f64>,
}

// ---------------------------------------------------------------------------
// SchemaNode
// ---------------------------------------------------------------------------

impl SchemaNode {
    fn with_kind(kind: SchemaKind) -> Self {
        Self {
            kind,
            title: None,
            description: None,
            default: None,
            widget: None,
            minimum: None,
            maximum: None,
            exclusive_minimum: None,
            exclusive_maximum: None,
        }
    }

    /// A field that carries its own value: anything but objects and
    /// (non multi-select) arrays.
    pub fn is_leaf(&self) -> bool {
        !matches!(
            self.kind,
            SchemaKind::Object { .. } | SchemaKind::Array { .. }
        )
    }

    pub fn is_multiselect(&self) -> bool {
        matches!(self.kind, SchemaKind::Enum { multiple: true, .. })
    }

    pub fn properties(&self) -> Option<&IndexMap<String, SchemaNode>> {
        match &self.kind {
            SchemaKind::Object { properties } => Some(properties),
            _ => None,
        }
    }

    pub fn enum_options(&self) -> Option<&[EnumOption]> {
        match &self.kind {
            SchemaKind::Enum { options, .. } => Some(options),
            _ => None,
        }
    }

    /// Child node for one path segment.
    pub fn child(&self, segment: &PathSegment) -> Option<&SchemaNode> {
        match (&self.kind, segment) {
            (SchemaKind::Object { properties }, PathSegment::Key(key)) => properties.get(key),
            (SchemaKind::Array { items }, PathSegment::Index(_)) => Some(items),
            _ => None,
        }
    }

    /// Value used when neither the data nor the schema's `default` says
    /// anything for this node.
    pub fn type_default(&self) -> SettingValue {
        match &self.kind {
            SchemaKind::String => SettingValue::String(String::new()),
            SchemaKind::Boolean => SettingValue::Bool(false),
            SchemaKind::Object { .. } => SettingValue::empty_object(),
            SchemaKind::Array { .. } | SchemaKind::Enum { multiple: true, .. } => {
                SettingValue::empty_array()
            }
            SchemaKind::Integer
            | SchemaKind::Number
            | SchemaKind::Enum { multiple: false, .. }
            | SchemaKind::Any => SettingValue::Null,
        }
    }

    /// Declared `default`, falling back to [`type_default`](Self::type_default).
    pub fn effective_default(&self) -> SettingValue {
        self.default.clone().unwrap_or_else(|| self.type_default())
    }

    pub fn input_bounds(&self) -> InputBounds {
        match self.kind {
            SchemaKind::Integer => InputBounds {
                min: self
                    .exclusive_minimum
                    .map(|m| m.floor() + 1.0)
                    .or(self.minimum.map(f64::ceil)),
                max: self
                    .exclusive_maximum
                    .map(|m| m.ceil() - 1.0)
                    .or(self.maximum.map(f64::floor)),
                min_exclusive: false,
                max_exclusive: false,
                step: Some(1.0),
            },
            SchemaKind::Number => InputBounds {
                min: self.exclusive_minimum.or(self.minimum),
                max: self.exclusive_maximum.or(self.maximum),
                min_exclusive: self.exclusive_minimum.is_some(),
                max_exclusive: self.exclusive_maximum.is_some(),
                step: None,
            },
            _ => InputBounds::default(),
        }
    }

    /// Clamp an integer into this node's effective inclusive bounds.
    pub fn clamp_integer(&self, value: i64) -> i64 {
        let bounds = self.input_bounds();
        let mut clamped = value;
        if let Some(min) = bounds.min {
            if (clamped as f64) < min {
                clamped = min as i64;
            }
        }
        if let Some(max) = bounds.max {
            if (clamped as f64) > max {
                clamped = max as i64;
            }
        }
        clamped
    }

    /// True when `value` is one of the declared enum options.
    pub fn allows_option(&self, value: &SettingValue) -> bool {
        self.enum_options()
            .map(|options| options.iter().any(|o| &o.value == value))
            .unwrap_or(true)
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    root: SchemaNode,
}

impl Schema {
    pub fn new(root: SchemaNode) -> Self {
        Self { root }
    }

    /// Parse a schema document.
    pub fn from_value(document: &Value) -> Result<Self, CoreError> {
        let mut parser = Parser {
            document,
            ref_stack: Vec::new(),
        };
        let root = parser.parse_node(document, 0)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &SchemaNode {
        &self.root
    }

    /// Schema node describing the field at `path`.
    pub fn node_at(&self, path: &FieldPath) -> Option<&SchemaNode> {
        path.segments()
            .iter()
            .try_fold(&self.root, |node, segment| node.child(segment))
    }

    /// Verify that no two reachable paths derive the same field id.
    ///
    /// Array elements stand for every index at once, so a key such as
    /// `list_1` collides with element `1` of an array `list`.
    pub fn check_field_ids(&self) -> Result<(), CoreError> {
        let mut templates: Vec<Vec<IdToken>> = Vec::new();
        let mut stack = vec![(Vec::new(), &self.root)];
        while let Some((segments, node)) = stack.pop() {
            let template = id_template(&segments);
            if let Some(previous) = templates.iter().find(|other| templates_overlap(other, &template)) {
                return Err(CoreError::Schema(format!(
                    "Fields '{}' and '{}' can derive the same field id",
                    render_template(previous),
                    render_template(&template),
                )));
            }
            templates.push(template);

            match &node.kind {
                SchemaKind::Object { properties } => {
                    for (key, child) in properties {
                        let mut child_segments = segments.clone();
                        child_segments.push(Some(key.as_str()));
                        stack.push((child_segments, child));
                    }
                }
                SchemaKind::Array { items } => {
                    let mut child_segments = segments.clone();
                    child_segments.push(None);
                    stack.push((child_segments, &**items));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// One `_`-separated piece of a field id; `Index` matches any array index.
#[derive(Debug, Clone, PartialEq)]
enum IdToken {
    Literal(String),
    Index,
}

/// Field-id tokens for a schema position; `None` segments are array items.
fn id_template(segments: &[Option<&str>]) -> Vec<IdToken> {
    let mut tokens = vec![IdToken::Literal(ROOT_SEGMENT.to_string())];
    for segment in segments {
        match segment {
            Some(key) => tokens.extend(
                key.split(FIELD_ID_SEPARATOR)
                    .map(|part| IdToken::Literal(part.to_string())),
            ),
            None => tokens.push(IdToken::Index),
        }
    }
    tokens
}

fn templates_overlap(a: &[IdToken], b: &[IdToken]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|pair| match pair {
            (IdToken::Literal(x), IdToken::Literal(y)) => x == y,
            (IdToken::Index, IdToken::Index) => true,
            (IdToken::Index, IdToken::Literal(s)) | (IdToken::Literal(s), IdToken::Index) => {
                is_index_literal(s)
            }
        })
}

/// Digits as a `usize` renders them: no sign, no leading zero.
fn is_index_literal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) && (s == "0" || !s.starts_with('0'))
}

fn render_template(tokens: &[IdToken]) -> String {
    let separator = FIELD_ID_SEPARATOR.to_string();
    tokens
        .iter()
        .map(|token| match token {
            IdToken::Literal(part) => part.as_str(),
            IdToken::Index => "<n>",
        })
        .collect::<Vec<_>>()
        .join(separator.as_str())
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    document: &'a Value,
    ref_stack: Vec<String>,
}

impl<'a> Parser<'a> {
    fn parse_node(&mut self, raw: &'a Value, depth: usize) -> Result<SchemaNode, CoreError> {
        if depth > MAX_SCHEMA_DEPTH {
            return Err(CoreError::Schema(format!(
                "Schema nesting exceeds {MAX_SCHEMA_DEPTH} levels"
            )));
        }

        let obj = match raw {
            Value::Object(obj) => obj,
            Value::Bool(true) => return Ok(SchemaNode::with_kind(SchemaKind::Any)),
            other => {
                return Err(CoreError::Schema(format!(
                    "Schema node must be an object, got {other}"
                )))
            }
        };

        if let Some(reference) = reference_of(obj) {
            let mut node = self.resolve_reference(reference, depth)?;
            apply_annotations(&mut node, obj);
            return Ok(node);
        }

        let kind = self.parse_kind(obj, depth)?;
        let mut node = SchemaNode::with_kind(kind);
        apply_annotations(&mut node, obj);
        Ok(node)
    }

    fn resolve_reference(
        &mut self,
        reference: &str,
        depth: usize,
    ) -> Result<SchemaNode, CoreError> {
        let (name, section) = REF_PREFIXES
            .iter()
            .find_map(|(prefix, section)| {
                reference
                    .strip_prefix(prefix)
                    .map(|name| (name.to_string(), *section))
            })
            .ok_or_else(|| CoreError::Schema(format!("Unsupported $ref '{reference}'")))?;

        if self.ref_stack.contains(&name) {
            return Err(CoreError::Schema(format!(
                "Recursive $ref '{reference}' is not supported"
            )));
        }

        let document = self.document;
        let target = document
            .get(section)
            .and_then(|defs| defs.get(&name))
            .ok_or_else(|| CoreError::Schema(format!("Unresolved $ref '{reference}'")))?;

        self.ref_stack.push(name);
        let node = self.parse_node(target, depth + 1);
        self.ref_stack.pop();
        node
    }

    fn parse_kind(
        &mut self,
        obj: &'a Map<String, Value>,
        depth: usize,
    ) -> Result<SchemaKind, CoreError> {
        let type_name = declared_type(obj);

        if type_name == Some("array") {
            if let Some(options) = obj.get("enum").and_then(Value::as_array) {
                return Ok(SchemaKind::Enum {
                    options: parse_options(options),
                    multiple: true,
                });
            }
            let items = match obj.get("items") {
                Some(items) => self.parse_node(items, depth + 1)?,
                None => SchemaNode::with_kind(SchemaKind::Any),
            };
            return Ok(match items.kind {
                SchemaKind::Enum {
                    options,
                    multiple: false,
                } => SchemaKind::Enum {
                    options,
                    multiple: true,
                },
                _ => SchemaKind::Array {
                    items: Box::new(items),
                },
            });
        }

        if let Some(options) = obj.get("enum").and_then(Value::as_array) {
            return Ok(SchemaKind::Enum {
                options: parse_options(options),
                multiple: false,
            });
        }

        if type_name == Some("object") || obj.contains_key("properties") {
            let mut properties = IndexMap::new();
            if let Some(raw_props) = obj.get("properties").and_then(Value::as_object) {
                for (key, raw_child) in raw_props {
                    properties.insert(key.clone(), self.parse_node(raw_child, depth + 1)?);
                }
            }
            return Ok(SchemaKind::Object { properties });
        }

        Ok(match type_name {
            Some("string") => SchemaKind::String,
            Some("integer") => SchemaKind::Integer,
            Some("number") => SchemaKind::Number,
            Some("boolean") => SchemaKind::Boolean,
            Some(other) => {
                tracing::debug!(schema_type = other, "Unknown schema type, accepting any value");
                SchemaKind::Any
            }
            None => SchemaKind::Any,
        })
    }
}

/// `$ref` directly on the node, or wrapped in a single-element
/// `allOf` / `anyOf` (how generated schemas attach titles to references).
fn reference_of(obj: &Map<String, Value>) -> Option<&str> {
    if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
        return Some(reference);
    }
    ["allOf", "anyOf"].iter().find_map(|key| {
        let list = obj.get(*key)?.as_array()?;
        match list.as_slice() {
            [single] => single.get("$ref").and_then(Value::as_str),
            _ => None,
        }
    })
}

/// First non-null entry of `type`, which may be a string or a list.
fn declared_type(obj: &Map<String, Value>) -> Option<&str> {
    match obj.get("type")? {
        Value::String(s) => Some(s.as_str()),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => None,
    }
}

fn parse_options(raw: &[Value]) -> Vec<EnumOption> {
    raw.iter()
        .map(|option| match option {
            Value::Object(obj) if obj.contains_key("value") => {
                let value = obj.get("value").cloned().unwrap_or(Value::Null);
                let label = obj
                    .get("label")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| display_label(&value));
                EnumOption {
                    value: SettingValue::from(value),
                    label,
                }
            }
            other => EnumOption {
                value: SettingValue::from(other.clone()),
                label: display_label(other),
            },
        })
        .collect()
}

fn display_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Copy annotations and constraints written on `obj` onto `node`. Keys
/// beside a `$ref` win over the referenced definition.
fn apply_annotations(node: &mut SchemaNode, obj: &Map<String, Value>) {
    let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
    let number = |key: &str| obj.get(key).and_then(Value::as_f64);

    if let Some(title) = text("title") {
        node.title = Some(title);
    }
    if let Some(description) = text("description") {
        node.description = Some(description);
    }
    if let Some(widget) = text("widget") {
        node.widget = Some(widget);
    }
    if let Some(default) = obj.get("default") {
        node.default = Some(SettingValue::from(default.clone()));
    }
    if let Some(v) = number("minimum") {
        node.minimum = Some(v);
    }
    if let Some(v) = number("maximum") {
        node.maximum = Some(v);
    }
    if let Some(v) = number("exclusiveMinimum") {
        node.exclusive_minimum = Some(v);
    }
    if let Some(v) = number("exclusiveMaximum") {
        node.exclusive_maximum = Some(v);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn parse(doc: Value) -> Schema {
        Schema::from_value(&doc).expect("schema should parse")
    }

    // -- parsing --

    #[test]
    fn parses_object_properties_in_order() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "zeta": {"type": "string"},
                "alpha": {"type": "integer"},
            }
        }));
        let keys: Vec<&String> = schema.root().properties().unwrap().keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn resolves_refs_with_local_overrides() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "root": {"title": "Project root", "allOf": [{"$ref": "#/definitions/Root"}]}
            },
            "definitions": {
                "Root": {
                    "title": "Root",
                    "type": "object",
                    "properties": {"path": {"type": "string", "default": "/mnt"}}
                }
            }
        }));
        let node = schema.node_at(&FieldPath::parse_dotted("root")).unwrap();
        assert_eq!(node.title.as_deref(), Some("Project root"));
        let path = schema.node_at(&FieldPath::parse_dotted("root.path")).unwrap();
        assert_eq!(path.default, Some(SettingValue::from("/mnt")));
    }

    #[test]
    fn recursive_ref_is_rejected() {
        let doc = json!({
            "$ref": "#/$defs/Node",
            "$defs": {
                "Node": {"type": "object", "properties": {"next": {"$ref": "#/$defs/Node"}}}
            }
        });
        assert_matches!(Schema::from_value(&doc), Err(CoreError::Schema(_)));
    }

    #[test]
    fn unresolved_ref_is_rejected() {
        let doc = json!({"$ref": "#/definitions/Missing"});
        assert_matches!(Schema::from_value(&doc), Err(CoreError::Schema(msg)) if msg.contains("Missing"));
    }

    #[test]
    fn non_object_node_is_rejected() {
        assert!(Schema::from_value(&json!("string")).is_err());
    }

    // -- enums --

    #[test]
    fn enum_options_accept_labelled_objects() {
        let schema = parse(json!({
            "enum": ["plain", {"value": "v", "label": "Nice label"}, {"value": 3}]
        }));
        let options = schema.root().enum_options().unwrap();
        assert_eq!(options[0].label, "plain");
        assert_eq!(options[1].value, SettingValue::from("v"));
        assert_eq!(options[1].label, "Nice label");
        assert_eq!(options[2].label, "3");
    }

    #[test]
    fn array_of_enum_is_a_multiselect_leaf() {
        let schema = parse(json!({
            "type": "array",
            "uniqueItems": true,
            "items": {"type": "string", "enum": ["a", "b"]}
        }));
        assert!(schema.root().is_multiselect());
        assert!(schema.root().is_leaf());
        assert_eq!(schema.root().type_default(), SettingValue::empty_array());
    }

    #[test]
    fn nullable_type_list_uses_first_concrete_type() {
        let schema = parse(json!({"type": ["null", "integer"]}));
        assert_matches!(schema.root().kind, SchemaKind::Integer);
    }

    // -- bounds --

    #[test]
    fn exclusive_integer_bounds_become_inclusive() {
        let schema = parse(json!({"type": "integer", "exclusiveMinimum": 4, "exclusiveMaximum": 10}));
        let bounds = schema.root().input_bounds();
        assert_eq!(bounds.min, Some(5.0));
        assert_eq!(bounds.max, Some(9.0));
        assert!(!bounds.min_exclusive);
        assert_eq!(bounds.step, Some(1.0));
    }

    #[test]
    fn exclusive_bound_wins_over_inclusive() {
        let schema = parse(json!({"type": "integer", "minimum": 0, "exclusiveMinimum": 4}));
        assert_eq!(schema.root().input_bounds().min, Some(5.0));
    }

    #[test]
    fn number_bounds_keep_exclusivity() {
        let schema = parse(json!({"type": "number", "exclusiveMaximum": 1.5}));
        let bounds = schema.root().input_bounds();
        assert_eq!(bounds.max, Some(1.5));
        assert!(bounds.max_exclusive);
    }

    #[test]
    fn clamp_integer_respects_bounds() {
        let schema = parse(json!({"type": "integer", "minimum": 1, "exclusiveMaximum": 10}));
        assert_eq!(schema.root().clamp_integer(-3), 1);
        assert_eq!(schema.root().clamp_integer(5), 5);
        assert_eq!(schema.root().clamp_integer(10), 9);
    }

    // -- navigation / defaults --

    #[test]
    fn node_at_descends_through_array_items() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "roots": {"type": "array", "items": {"type": "object", "properties": {"name": {"type": "string"}}}}
            }
        }));
        let node = schema.node_at(&FieldPath::parse_dotted("roots.3.name")).unwrap();
        assert_matches!(node.kind, SchemaKind::String);
        assert!(schema.node_at(&FieldPath::parse_dotted("roots.name")).is_none());
    }

    #[test]
    fn type_defaults_per_kind() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "s": {"type": "string"},
                "b": {"type": "boolean"},
                "i": {"type": "integer"},
                "d": {"type": "integer", "default": 7},
            }
        }));
        let at = |p: &str| schema.node_at(&FieldPath::parse_dotted(p)).unwrap();
        assert_eq!(at("s").effective_default(), SettingValue::from(""));
        assert_eq!(at("b").effective_default(), SettingValue::from(false));
        assert!(at("i").effective_default().is_null());
        assert_eq!(at("d").effective_default(), SettingValue::from(7));
    }

    // -- field id collisions --

    #[test]
    fn distinct_schema_paths_have_distinct_ids() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "a": {"type": "object", "properties": {"b": {"type": "string"}}},
                "list": {"type": "array", "items": {"type": "string"}},
            }
        }));
        assert!(schema.check_field_ids().is_ok());
    }

    #[test]
    fn colliding_field_ids_are_reported() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "a_b": {"type": "string"},
                "a": {"type": "object", "properties": {"b": {"type": "string"}}},
            }
        }));
        assert_matches!(schema.check_field_ids(), Err(CoreError::Schema(msg)) if msg.contains("root_a_b"));
    }

    #[test]
    fn key_colliding_with_later_array_element_is_reported() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "list": {"type": "array", "items": {"type": "string"}},
                "list_1": {"type": "string"},
            }
        }));
        assert_matches!(
            schema.check_field_ids(),
            Err(CoreError::Schema(msg)) if msg.contains("root_list_1") && msg.contains("root_list_<n>")
        );
    }

    #[test]
    fn nested_element_collision_is_reported() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "roots": {
                    "type": "array",
                    "items": {"type": "object", "properties": {"name": {"type": "string"}}}
                },
                "roots_12_name": {"type": "string"},
            }
        }));
        assert_matches!(schema.check_field_ids(), Err(CoreError::Schema(_)));
    }

    #[test]
    fn non_index_suffixes_do_not_collide() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "list": {"type": "array", "items": {"type": "string"}},
                "list_count": {"type": "integer"},
                "list_01": {"type": "string"},
            }
        }));
        assert!(schema.check_field_ids().is_ok());
    }
}
