//! Input schema normalization
//!
//! Tool servers publish arbitrary JSON-Schema-like documents. Before a schema
//! is handed to a model provider it is rewritten so the strictest function
//! calling validators accept it:
//!
//! 1. Local `$ref` pointers are inlined; unresolvable or cyclic references
//!    become empty object schemas.
//! 2. Every array declares `items`, and those items declare a concrete type.
//!    `anyOf`/`oneOf`/`allOf` nodes with an array branch are promoted to a
//!    plain array declaration.
//! 3. Keywords outside the supported dialect are dropped.
//! 4. Known per-tool field overrides are applied.
//!
//! The top level always declares a type, defaulting to an object with an
//! empty `properties` map. Normalizing a normalized schema is a no-op.

use serde_json::{json, Map, Value};

/// Keywords kept on every schema node
const STANDARD_KEYWORDS: &[&str] = &[
    "description",
    "enum",
    "format",
    "default",
    "nullable",
    "required",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "minLength",
    "maxLength",
    "pattern",
    "minItems",
    "maxItems",
    "uniqueItems",
    "minProperties",
    "maxProperties",
];

/// Field names whose untyped list items are assumed to be strings
const STRING_LIST_FIELDS: &[&str] = &[
    "args",
    "arguments",
    "command",
    "commands",
    "containers",
    "files",
    "flags",
    "hosts",
    "ids",
    "keys",
    "labels",
    "names",
    "namespaces",
    "paths",
    "resources",
    "selectors",
    "tags",
    "urls",
    "values",
];

/// Nested `$ref` resolution stops here
const MAX_REF_DEPTH: usize = 32;

/// A schema replacement for one field of one tool
struct FieldOverride {
    tool: &'static str,
    field: &'static str,
    schema: fn() -> Value,
}

fn string_list() -> Value {
    json!({"type": "array", "items": {"type": "string"}})
}

/// Fields some servers declare in shapes strict validators reject
const FIELD_OVERRIDES: &[FieldOverride] = &[
    FieldOverride {
        tool: "kubectl",
        field: "args",
        schema: string_list,
    },
    FieldOverride {
        tool: "helm",
        field: "args",
        schema: string_list,
    },
    FieldOverride {
        tool: "trivy",
        field: "args",
        schema: string_list,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    AnyOf,
    OneOf,
    AllOf,
}

impl Combinator {
    const ALL: [Combinator; 3] = [Combinator::AnyOf, Combinator::OneOf, Combinator::AllOf];

    fn keyword(self) -> &'static str {
        match self {
            Combinator::AnyOf => "anyOf",
            Combinator::OneOf => "oneOf",
            Combinator::AllOf => "allOf",
        }
    }
}

/// Typed view of one schema node; `keywords` holds the retained standard keywords
#[derive(Debug, Clone, PartialEq)]
enum SchemaNode {
    Object {
        properties: Vec<(String, SchemaNode)>,
        keywords: Map<String, Value>,
    },
    Array {
        items: Option<Box<SchemaNode>>,
        keywords: Map<String, Value>,
    },
    Primitive {
        kind: String,
        keywords: Map<String, Value>,
    },
    Ref {
        path: String,
        keywords: Map<String, Value>,
    },
    Combinator {
        kind: Combinator,
        branches: Vec<SchemaNode>,
        keywords: Map<String, Value>,
    },
    Untyped {
        keywords: Map<String, Value>,
    },
}

impl SchemaNode {
    fn empty_object(keywords: Map<String, Value>) -> Self {
        SchemaNode::Object {
            properties: Vec::new(),
            keywords,
        }
    }

    fn parse(value: &Value) -> Self {
        let Value::Object(obj) = value else {
            return SchemaNode::Untyped {
                keywords: Map::new(),
            };
        };

        let mut keywords: Map<String, Value> = obj
            .iter()
            .filter(|(key, _)| STANDARD_KEYWORDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if let Some(Value::String(path)) = obj.get("$ref") {
            return SchemaNode::Ref {
                path: path.clone(),
                keywords,
            };
        }

        match declared_type(obj, &mut keywords).as_deref() {
            Some("object") => SchemaNode::Object {
                properties: parse_properties(obj),
                keywords,
            },
            Some("array") => SchemaNode::Array {
                items: parse_items(obj),
                keywords,
            },
            Some(kind) => SchemaNode::Primitive {
                kind: kind.to_string(),
                keywords,
            },
            None => {
                if let Some((kind, branches)) = parse_combinator(obj) {
                    SchemaNode::Combinator {
                        kind,
                        branches,
                        keywords,
                    }
                } else if obj.contains_key("properties") {
                    SchemaNode::Object {
                        properties: parse_properties(obj),
                        keywords,
                    }
                } else if obj.contains_key("items") {
                    SchemaNode::Array {
                        items: parse_items(obj),
                        keywords,
                    }
                } else {
                    SchemaNode::Untyped { keywords }
                }
            }
        }
    }

    fn keywords_mut(&mut self) -> &mut Map<String, Value> {
        match self {
            SchemaNode::Object { keywords, .. }
            | SchemaNode::Array { keywords, .. }
            | SchemaNode::Primitive { keywords, .. }
            | SchemaNode::Ref { keywords, .. }
            | SchemaNode::Combinator { keywords, .. }
            | SchemaNode::Untyped { keywords } => keywords,
        }
    }

    /// Overlay `local` keywords (e.g. a description next to a `$ref`)
    fn with_keywords(mut self, local: Map<String, Value>) -> Self {
        self.keywords_mut().extend(local);
        self
    }

    fn has_concrete_type(&self) -> bool {
        match self {
            SchemaNode::Object { .. } | SchemaNode::Array { .. } => true,
            SchemaNode::Primitive { kind, .. } => kind != "null",
            _ => false,
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, SchemaNode::Primitive { kind, .. } if kind == "null")
    }

    fn into_value(self) -> Value {
        match self {
            SchemaNode::Object {
                properties,
                mut keywords,
            } => {
                keywords.insert("type".into(), json!("object"));
                let properties: Map<String, Value> = properties
                    .into_iter()
                    .map(|(name, node)| (name, node.into_value()))
                    .collect();
                keywords.insert("properties".into(), Value::Object(properties));
                Value::Object(keywords)
            }
            SchemaNode::Array {
                items,
                mut keywords,
            } => {
                keywords.insert("type".into(), json!("array"));
                if let Some(items) = items {
                    keywords.insert("items".into(), items.into_value());
                }
                Value::Object(keywords)
            }
            SchemaNode::Primitive { kind, mut keywords } => {
                keywords.insert("type".into(), Value::String(kind));
                Value::Object(keywords)
            }
            SchemaNode::Ref { path, mut keywords } => {
                keywords.insert("$ref".into(), Value::String(path));
                Value::Object(keywords)
            }
            SchemaNode::Combinator {
                kind,
                branches,
                mut keywords,
            } => {
                let branches = branches.into_iter().map(SchemaNode::into_value).collect();
                keywords.insert(kind.keyword().into(), Value::Array(branches));
                Value::Object(keywords)
            }
            SchemaNode::Untyped { keywords } => Value::Object(keywords),
        }
    }
}

/// Read `type`, collapsing `["x", "null"]` into `x` plus `nullable: true`
fn declared_type(obj: &Map<String, Value>, keywords: &mut Map<String, Value>) -> Option<String> {
    match obj.get("type")? {
        Value::String(kind) => Some(kind.clone()),
        Value::Array(kinds) => {
            let kinds: Vec<&str> = kinds.iter().filter_map(Value::as_str).collect();
            let concrete = kinds.iter().find(|k| **k != "null");
            if concrete.is_some() && kinds.contains(&"null") {
                keywords.insert("nullable".into(), Value::Bool(true));
            }
            concrete.or(kinds.first()).map(|k| k.to_string())
        }
        _ => None,
    }
}

fn parse_properties(obj: &Map<String, Value>) -> Vec<(String, SchemaNode)> {
    match obj.get("properties") {
        Some(Value::Object(props)) => props
            .iter()
            .map(|(name, schema)| (name.clone(), SchemaNode::parse(schema)))
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_items(obj: &Map<String, Value>) -> Option<Box<SchemaNode>> {
    let items = obj.get("items")?;
    match items {
        // Tuple-style items: the first position stands in for all of them
        Value::Array(list) => list.first().map(|i| Box::new(SchemaNode::parse(i))),
        Value::Object(_) => Some(Box::new(SchemaNode::parse(items))),
        _ => None,
    }
}

fn parse_combinator(obj: &Map<String, Value>) -> Option<(Combinator, Vec<SchemaNode>)> {
    Combinator::ALL.into_iter().find_map(|kind| match obj.get(kind.keyword()) {
        Some(Value::Array(branches)) => {
            Some((kind, branches.iter().map(SchemaNode::parse).collect()))
        }
        _ => None,
    })
}

// =============================================================================
// Passes
// =============================================================================

/// Inline `$ref` pointers against the document root
fn resolve_refs(node: SchemaNode, root: &Value, stack: &mut Vec<String>) -> SchemaNode {
    match node {
        SchemaNode::Ref { path, keywords } => {
            if stack.len() >= MAX_REF_DEPTH || stack.contains(&path) {
                tracing::debug!("Unresolvable schema reference {}", path);
                return SchemaNode::empty_object(keywords);
            }
            let target = path.strip_prefix('#').and_then(|pointer| root.pointer(pointer));
            match target {
                Some(target) => {
                    stack.push(path);
                    let resolved = resolve_refs(SchemaNode::parse(target), root, stack);
                    stack.pop();
                    resolved.with_keywords(keywords)
                }
                None => {
                    tracing::debug!("Dangling schema reference {}", path);
                    SchemaNode::empty_object(keywords)
                }
            }
        }
        SchemaNode::Object {
            properties,
            keywords,
        } => SchemaNode::Object {
            properties: properties
                .into_iter()
                .map(|(name, prop)| (name, resolve_refs(prop, root, stack)))
                .collect(),
            keywords,
        },
        SchemaNode::Array { items, keywords } => SchemaNode::Array {
            items: items.map(|i| Box::new(resolve_refs(*i, root, stack))),
            keywords,
        },
        SchemaNode::Combinator {
            kind,
            branches,
            keywords,
        } => SchemaNode::Combinator {
            kind,
            branches: branches
                .into_iter()
                .map(|b| resolve_refs(b, root, stack))
                .collect(),
            keywords,
        },
        leaf => leaf,
    }
}

/// Guarantee typed array items, promote array combinators, prune `required`
fn normalize_node(node: SchemaNode, field: Option<&str>) -> SchemaNode {
    match node {
        SchemaNode::Object {
            properties,
            mut keywords,
        } => {
            let properties: Vec<(String, SchemaNode)> = properties
                .into_iter()
                .map(|(name, prop)| {
                    let prop = normalize_node(prop, Some(name.as_str()));
                    (name, prop)
                })
                .collect();
            prune_required(&mut keywords, &properties);
            SchemaNode::Object {
                properties,
                keywords,
            }
        }
        SchemaNode::Array { items, keywords } => SchemaNode::Array {
            items: Some(Box::new(ensure_item_type(items.map(|i| *i), field))),
            keywords,
        },
        SchemaNode::Combinator {
            kind,
            branches,
            keywords,
        } => {
            let branches = branches
                .into_iter()
                .map(|b| normalize_node(b, field))
                .collect();
            promote_array(kind, branches, keywords)
        }
        SchemaNode::Ref { keywords, .. } => SchemaNode::empty_object(keywords),
        leaf => leaf,
    }
}

fn ensure_item_type(items: Option<SchemaNode>, field: Option<&str>) -> SchemaNode {
    match items.map(|i| normalize_node(i, field)) {
        None => fallback_item(field, Map::new()),
        Some(SchemaNode::Untyped { keywords }) => fallback_item(field, keywords),
        Some(SchemaNode::Combinator {
            branches, keywords, ..
        }) => match branches.into_iter().find(SchemaNode::has_concrete_type) {
            Some(branch) => branch.with_keywords(keywords),
            None => fallback_item(field, keywords),
        },
        Some(SchemaNode::Primitive { kind, keywords }) if kind == "null" => {
            fallback_item(field, keywords)
        }
        Some(node) => node,
    }
}

fn fallback_item(field: Option<&str>, keywords: Map<String, Value>) -> SchemaNode {
    let is_string_list = field.is_some_and(|f| {
        STRING_LIST_FIELDS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(f))
    });
    if is_string_list {
        SchemaNode::Primitive {
            kind: "string".to_string(),
            keywords,
        }
    } else {
        SchemaNode::empty_object(keywords)
    }
}

fn promote_array(
    kind: Combinator,
    mut branches: Vec<SchemaNode>,
    keywords: Map<String, Value>,
) -> SchemaNode {
    let nullable = branches.iter().any(SchemaNode::is_null);
    let Some(pos) = branches
        .iter()
        .position(|b| matches!(b, SchemaNode::Array { .. }))
    else {
        return SchemaNode::Combinator {
            kind,
            branches,
            keywords,
        };
    };

    match branches.swap_remove(pos) {
        SchemaNode::Array {
            items,
            keywords: mut merged,
        } => {
            merged.extend(keywords);
            if nullable {
                merged.insert("nullable".into(), Value::Bool(true));
            }
            SchemaNode::Array {
                items,
                keywords: merged,
            }
        }
        other => other,
    }
}

/// Drop `required` entries that name no declared property
fn prune_required(keywords: &mut Map<String, Value>, properties: &[(String, SchemaNode)]) {
    let Some(Value::Array(required)) = keywords.get("required") else {
        keywords.remove("required");
        return;
    };
    let kept: Vec<Value> = required
        .iter()
        .filter(|r| {
            r.as_str()
                .is_some_and(|name| properties.iter().any(|(p, _)| p == name))
        })
        .cloned()
        .collect();
    if kept.is_empty() {
        keywords.remove("required");
    } else {
        keywords.insert("required".into(), Value::Array(kept));
    }
}

fn apply_overrides(tool_name: &str, node: SchemaNode) -> SchemaNode {
    let SchemaNode::Object {
        properties,
        keywords,
    } = node
    else {
        return node;
    };

    let properties = properties
        .into_iter()
        .map(|(name, prop)| {
            let replacement = FIELD_OVERRIDES
                .iter()
                .find(|o| o.tool == tool_name && o.field == name);
            match replacement {
                Some(o) => {
                    let mut local = Map::new();
                    if let SchemaNode::Object { keywords, .. }
                    | SchemaNode::Array { keywords, .. }
                    | SchemaNode::Primitive { keywords, .. }
                    | SchemaNode::Combinator { keywords, .. }
                    | SchemaNode::Untyped { keywords } = &prop
                    {
                        if let Some(description) = keywords.get("description") {
                            local.insert("description".into(), description.clone());
                        }
                    }
                    let node = SchemaNode::parse(&(o.schema)()).with_keywords(local);
                    (name, node)
                }
                None => (name, prop),
            }
        })
        .collect();

    SchemaNode::Object {
        properties,
        keywords,
    }
}

/// Coerce the top level into a typed declaration
fn ensure_top_level_type(node: SchemaNode) -> SchemaNode {
    match node {
        SchemaNode::Untyped { keywords } => SchemaNode::empty_object(keywords),
        SchemaNode::Combinator {
            branches, keywords, ..
        } => {
            let mut properties: Vec<(String, SchemaNode)> = Vec::new();
            for branch in branches {
                if let SchemaNode::Object {
                    properties: branch_props,
                    ..
                } = branch
                {
                    for (name, prop) in branch_props {
                        if !properties.iter().any(|(p, _)| *p == name) {
                            properties.push((name, prop));
                        }
                    }
                }
            }
            SchemaNode::Object {
                properties,
                keywords,
            }
        }
        other => other,
    }
}

// =============================================================================
// Public API
// =============================================================================

/// Normalize a schema without tool-specific overrides
pub fn normalize_schema(schema: &Value) -> Value {
    normalize_with(None, schema)
}

/// Normalize a tool's input schema, including overrides for that tool
pub fn normalize_tool_schema(tool_name: &str, schema: &Value) -> Value {
    normalize_with(Some(tool_name), schema)
}

fn normalize_with(tool_name: Option<&str>, schema: &Value) -> Value {
    let node = SchemaNode::parse(schema);
    let node = resolve_refs(node, schema, &mut Vec::new());
    let node = normalize_node(node, None);
    let node = match tool_name {
        Some(tool) => apply_overrides(tool, node),
        None => node,
    };
    ensure_top_level_type(node).into_value()
}
