//! Rust language support for Cairn.
//!
//! Extracts modules, structs, enums, traits, functions, methods, and struct
//! fields using tree-sitter-rust, plus `Calls`, `Implements`, `UsesType`,
//! `ReturnsType`, `Imports`, and `HasAttribute` edges.

use std::path::Path;

use tree_sitter::Node;

use super::common::{Extraction, ExtractedEntity, FILE_ENTITY};
use super::tree_sitter_utils::{
    cyclomatic, end_line, line_count, named_children, node_text, signature_before, start_line,
    walk_descendants,
};
use super::LanguageExtractor;
use crate::types::{EntityKind, EntityMetadata, Language, RelationshipKind, TypeFlavor};

/// Tree-sitter node kind constants for the Rust grammar.
mod node_kinds {
    // Items
    pub const FUNCTION_ITEM: &str = "function_item";
    pub const FUNCTION_SIGNATURE_ITEM: &str = "function_signature_item";
    pub const STRUCT_ITEM: &str = "struct_item";
    pub const ENUM_ITEM: &str = "enum_item";
    pub const TRAIT_ITEM: &str = "trait_item";
    pub const IMPL_ITEM: &str = "impl_item";
    pub const MOD_ITEM: &str = "mod_item";
    pub const USE_DECLARATION: &str = "use_declaration";
    pub const ATTRIBUTE_ITEM: &str = "attribute_item";
    pub const LINE_COMMENT: &str = "line_comment";

    // Structure
    pub const FIELD_DECLARATION_LIST: &str = "field_declaration_list";
    pub const ORDERED_FIELD_DECLARATION_LIST: &str = "ordered_field_declaration_list";
    pub const FIELD_DECLARATION: &str = "field_declaration";
    pub const PARAMETER: &str = "parameter";
    pub const SELF_PARAMETER: &str = "self_parameter";
    pub const VISIBILITY_MODIFIER: &str = "visibility_modifier";
    pub const FUNCTION_MODIFIERS: &str = "function_modifiers";

    // Expressions
    pub const CALL_EXPRESSION: &str = "call_expression";
    pub const FIELD_EXPRESSION: &str = "field_expression";
    pub const SCOPED_IDENTIFIER: &str = "scoped_identifier";
    pub const GENERIC_FUNCTION: &str = "generic_function";
    pub const STRUCT_EXPRESSION: &str = "struct_expression";
    pub const IDENTIFIER: &str = "identifier";

    // Use trees
    pub const USE_AS_CLAUSE: &str = "use_as_clause";
    pub const USE_LIST: &str = "use_list";
    pub const SCOPED_USE_LIST: &str = "scoped_use_list";
    pub const USE_WILDCARD: &str = "use_wildcard";

    /// Nodes that add a branch to a function's control flow.
    pub const DECISION_KINDS: &[&str] = &[
        "if_expression",
        "match_arm",
        "while_expression",
        "for_expression",
        "loop_expression",
    ];
}

use node_kinds::{
    ATTRIBUTE_ITEM, CALL_EXPRESSION, DECISION_KINDS, ENUM_ITEM, FIELD_DECLARATION,
    FIELD_DECLARATION_LIST, FIELD_EXPRESSION, FUNCTION_ITEM, FUNCTION_MODIFIERS,
    FUNCTION_SIGNATURE_ITEM, GENERIC_FUNCTION, IDENTIFIER, IMPL_ITEM, LINE_COMMENT, MOD_ITEM,
    ORDERED_FIELD_DECLARATION_LIST, PARAMETER, SCOPED_IDENTIFIER, SCOPED_USE_LIST, SELF_PARAMETER,
    STRUCT_EXPRESSION, STRUCT_ITEM, TRAIT_ITEM, USE_AS_CLAUSE, USE_DECLARATION, USE_LIST,
    USE_WILDCARD, VISIBILITY_MODIFIER,
};

/// Rust language support implementation.
pub struct RustExtractor;

impl LanguageExtractor for RustExtractor {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn tree_sitter_language(&self) -> tree_sitter::Language {
        tree_sitter_rust::LANGUAGE.into()
    }

    fn extract_tree(&self, tree: &tree_sitter::Tree, source: &str, path: &Path) -> Extraction {
        let root = tree.root_node();
        let mut walker = Walker {
            source,
            ex: Extraction::new(path, Language::Rust, line_count(&root)),
        };
        walker.visit_items(root, FILE_ENTITY, "", None);
        walker.ex
    }
}

struct Walker<'s> {
    source: &'s str,
    ex: Extraction,
}

/// The type whose `impl` or `trait` block is being walked.
#[derive(Clone, Copy)]
struct Owner<'a> {
    /// Qualified type name used as the member prefix
    name: &'a str,
    /// Entity index that members hang off
    index: usize,
}

impl<'s> Walker<'s> {
    fn text(&self, node: &Node<'_>) -> &'s str {
        node_text(node, self.source)
    }

    fn visit_items(
        &mut self,
        container: Node<'_>,
        parent: usize,
        prefix: &str,
        owner: Option<Owner<'_>>,
    ) {
        let mut attributes: Vec<(String, u32)> = Vec::new();
        let mut docs: Vec<String> = Vec::new();

        for child in named_children(&container) {
            match child.kind() {
                ATTRIBUTE_ITEM => {
                    if let Some(attr) = child.named_child(0).and_then(|a| a.named_child(0)) {
                        attributes.push((self.text(&attr).to_string(), start_line(&child)));
                    }
                    continue;
                }
                LINE_COMMENT => {
                    let text = self.text(&child);
                    match text.strip_prefix("///") {
                        Some(doc) => docs.push(doc.trim().to_string()),
                        None => docs.clear(),
                    }
                    continue;
                }
                _ => {}
            }

            let doc = (!docs.is_empty()).then(|| docs.join("\n"));
            let created = match child.kind() {
                FUNCTION_ITEM | FUNCTION_SIGNATURE_ITEM => {
                    self.function(child, parent, prefix, owner, doc)
                }
                STRUCT_ITEM => self.type_item(child, parent, prefix, TypeFlavor::Struct, doc),
                ENUM_ITEM => self.type_item(child, parent, prefix, TypeFlavor::Enum, doc),
                TRAIT_ITEM => self.trait_item(child, parent, prefix, doc),
                MOD_ITEM => self.mod_item(child, parent, prefix, doc),
                IMPL_ITEM => {
                    self.impl_item(child);
                    None
                }
                USE_DECLARATION => {
                    self.use_declaration(child);
                    None
                }
                _ => None,
            };

            if let Some(index) = created {
                for (attr, line) in &attributes {
                    self.ex
                        .add_edge(index, RelationshipKind::HasAttribute, attr, *line);
                }
            }
            attributes.clear();
            docs.clear();
        }
    }

    fn visibility(&self, node: &Node<'_>) -> String {
        named_children(node)
            .into_iter()
            .find(|c| c.kind() == VISIBILITY_MODIFIER)
            .map_or_else(
                || "private".to_string(),
                |v| match self.text(&v) {
                    "pub" => "public".to_string(),
                    "pub(crate)" => "crate".to_string(),
                    other => other.to_string(),
                },
            )
    }

    fn function(
        &mut self,
        node: Node<'_>,
        parent: usize,
        prefix: &str,
        owner: Option<Owner<'_>>,
        docstring: Option<String>,
    ) -> Option<usize> {
        let name = self.text(&node.child_by_field_name("name")?).to_string();
        let qualified = match owner {
            Some(o) => format!("{}::{name}", o.name),
            None => format!("{prefix}{name}"),
        };
        let body = node.child_by_field_name("body");
        let params = node
            .child_by_field_name("parameters")
            .map(|p| named_children(&p))
            .unwrap_or_default();

        let is_async = named_children(&node)
            .iter()
            .any(|c| c.kind() == FUNCTION_MODIFIERS && self.text(c).contains("async"));
        let has_self = params.iter().any(|p| p.kind() == SELF_PARAMETER);
        let typed_params: Vec<Node<'_>> = params
            .into_iter()
            .filter(|p| p.kind() == PARAMETER)
            .collect();

        let entity = ExtractedEntity {
            kind: EntityKind::Method,
            flavor: None,
            name: qualified,
            simple_name: name,
            start_line: start_line(&node),
            end_line: end_line(&node),
            signature: Some(signature_before(&node, body, self.source)),
            metadata: EntityMetadata {
                is_async,
                is_static: owner.is_some() && !has_self,
                visibility: Some(self.visibility(&node)),
                complexity: Some(cyclomatic(body, DECISION_KINDS)),
                line_count: Some(line_count(&node)),
                parameter_count: Some(u32::try_from(typed_params.len()).unwrap_or(u32::MAX)),
                docstring,
            },
        };
        let index = self.ex.add_entity(parent, entity);

        for param in &typed_params {
            if let Some(ty) = param.child_by_field_name("type") {
                let text = self.text(&ty).to_string();
                self.ex
                    .add_type_edges(index, RelationshipKind::UsesType, &text, start_line(param));
            }
        }
        if let Some(ret) = node.child_by_field_name("return_type") {
            let text = self.text(&ret).to_string();
            self.ex
                .add_type_edges(index, RelationshipKind::ReturnsType, &text, start_line(&ret));
        }
        if let Some(body) = body {
            self.calls(body, index, owner.map(|o| o.name));
        }
        Some(index)
    }

    fn calls(&mut self, body: Node<'_>, from: usize, self_type: Option<&str>) {
        let mut calls = Vec::new();
        walk_descendants(body, |n| {
            if n.kind() == CALL_EXPRESSION {
                if let Some(function) = n.child_by_field_name("function") {
                    calls.push((function, start_line(&n)));
                }
            }
            true
        });
        for (function, line) in calls {
            self.record_call(function, from, self_type, line);
        }
    }

    fn record_call(&mut self, function: Node<'_>, from: usize, self_type: Option<&str>, line: u32) {
        match function.kind() {
            IDENTIFIER => {
                let name = self.text(&function).to_string();
                self.ex.add_call(from, &name, None, None, line);
            }
            SCOPED_IDENTIFIER => {
                let (Some(path), Some(name)) = (
                    function.child_by_field_name("path"),
                    function.child_by_field_name("name"),
                ) else {
                    return;
                };
                let path_text = self.text(&path).to_string();
                let type_name = match last_segment(&path_text) {
                    "Self" => self_type.map_or("Self", last_segment).to_string(),
                    other => other.to_string(),
                };
                let target = format!("{type_name}::{}", self.text(&name));
                let inferred = starts_uppercase(&type_name).then(|| type_name.clone());
                self.ex.add_call(from, &target, Some(path_text), inferred, line);
            }
            FIELD_EXPRESSION => {
                let (Some(value), Some(field)) = (
                    function.child_by_field_name("value"),
                    function.child_by_field_name("field"),
                ) else {
                    return;
                };
                let receiver = self.text(&value).to_string();
                let inferred = if receiver == "self" {
                    self_type.map(ToString::to_string)
                } else {
                    self.constructed_type(value)
                };
                let method = self.text(&field).to_string();
                self.ex.add_call(from, &method, Some(receiver), inferred, line);
            }
            GENERIC_FUNCTION => {
                if let Some(inner) = function.child_by_field_name("function") {
                    self.record_call(inner, from, self_type, line);
                }
            }
            _ => {}
        }
    }

    /// Type of a receiver built in place (`Foo::new()`, `Foo { .. }`).
    fn constructed_type(&self, receiver: Node<'_>) -> Option<String> {
        match receiver.kind() {
            CALL_EXPRESSION => {
                let function = receiver.child_by_field_name("function")?;
                if function.kind() != SCOPED_IDENTIFIER {
                    return None;
                }
                let path = self.text(&function.child_by_field_name("path")?);
                let ty = last_segment(path);
                starts_uppercase(ty).then(|| ty.to_string())
            }
            STRUCT_EXPRESSION => {
                let name = receiver.child_by_field_name("name")?;
                Some(last_segment(self.text(&name)).to_string())
            }
            _ => None,
        }
    }

    fn type_entity(
        &self,
        node: &Node<'_>,
        prefix: &str,
        flavor: TypeFlavor,
        docstring: Option<String>,
    ) -> Option<ExtractedEntity> {
        let name = self.text(&node.child_by_field_name("name")?).to_string();
        let body = node.child_by_field_name("body");
        Some(ExtractedEntity {
            kind: EntityKind::Type,
            flavor: Some(flavor),
            name: format!("{prefix}{name}"),
            simple_name: name,
            start_line: start_line(node),
            end_line: end_line(node),
            signature: Some(signature_before(node, body, self.source)),
            metadata: EntityMetadata {
                visibility: Some(self.visibility(node)),
                line_count: Some(line_count(node)),
                docstring,
                ..EntityMetadata::default()
            },
        })
    }

    fn type_item(
        &mut self,
        node: Node<'_>,
        parent: usize,
        prefix: &str,
        flavor: TypeFlavor,
        docstring: Option<String>,
    ) -> Option<usize> {
        let entity = self.type_entity(&node, prefix, flavor, docstring)?;
        let type_name = entity.name.clone();
        let index = self.ex.add_entity(parent, entity);

        let Some(body) = node.child_by_field_name("body") else {
            return Some(index);
        };
        match body.kind() {
            FIELD_DECLARATION_LIST => {
                for field in named_children(&body) {
                    if field.kind() == FIELD_DECLARATION {
                        self.field(field, index, &type_name);
                    }
                }
            }
            ORDERED_FIELD_DECLARATION_LIST => {
                for ty in named_children(&body) {
                    if ty.kind() != VISIBILITY_MODIFIER {
                        let text = self.text(&ty).to_string();
                        let line = start_line(&ty);
                        self.ex
                            .add_type_edges(index, RelationshipKind::UsesType, &text, line);
                    }
                }
            }
            _ => {}
        }
        Some(index)
    }

    fn field(&mut self, node: Node<'_>, parent: usize, type_name: &str) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(&name_node).to_string();
        let entity = ExtractedEntity {
            kind: EntityKind::Property,
            flavor: None,
            name: format!("{type_name}::{name}"),
            simple_name: name,
            start_line: start_line(&node),
            end_line: end_line(&node),
            signature: Some(self.text(&node).to_string()),
            metadata: EntityMetadata {
                visibility: Some(self.visibility(&node)),
                ..EntityMetadata::default()
            },
        };
        let index = self.ex.add_entity(parent, entity);
        if let Some(ty) = node.child_by_field_name("type") {
            let text = self.text(&ty).to_string();
            self.ex
                .add_type_edges(index, RelationshipKind::UsesType, &text, start_line(&ty));
        }
    }

    fn trait_item(
        &mut self,
        node: Node<'_>,
        parent: usize,
        prefix: &str,
        docstring: Option<String>,
    ) -> Option<usize> {
        let entity = self.type_entity(&node, prefix, TypeFlavor::Trait, docstring)?;
        let name = entity.name.clone();
        let index = self.ex.add_entity(parent, entity);
        if let Some(body) = node.child_by_field_name("body") {
            let owner = Owner { name: &name, index };
            self.visit_items(body, index, prefix, Some(owner));
        }
        Some(index)
    }

    fn mod_item(
        &mut self,
        node: Node<'_>,
        parent: usize,
        prefix: &str,
        docstring: Option<String>,
    ) -> Option<usize> {
        let entity = self.type_entity(&node, prefix, TypeFlavor::Module, docstring)?;
        let nested_prefix = format!("{}::", entity.name);
        let index = self.ex.add_entity(parent, entity);
        if let Some(body) = node.child_by_field_name("body") {
            self.visit_items(body, index, &nested_prefix, None);
        }
        Some(index)
    }

    fn impl_item(&mut self, node: Node<'_>) {
        let Some(ty) = node.child_by_field_name("type") else {
            return;
        };
        let type_name = base_type_name(self.text(&ty)).to_string();

        // Impls of types defined elsewhere hang off the file entity.
        let (index, qualified) = match self.ex.find_type(&type_name) {
            Some(i) => (i, self.ex.entities[i].name.clone()),
            None => (FILE_ENTITY, type_name),
        };

        if let Some(trait_node) = node.child_by_field_name("trait") {
            let trait_name = base_type_name(self.text(&trait_node)).to_string();
            self.ex.add_edge(
                index,
                RelationshipKind::Implements,
                &trait_name,
                start_line(&node),
            );
        }
        if let Some(body) = node.child_by_field_name("body") {
            let owner = Owner {
                name: &qualified,
                index,
            };
            self.visit_items(body, owner.index, "", Some(owner));
        }
    }

    fn use_declaration(&mut self, node: Node<'_>) {
        let Some(argument) = node.child_by_field_name("argument") else {
            return;
        };
        let mut paths = Vec::new();
        self.use_paths(argument, "", &mut paths);
        let line = start_line(&node);
        for path in paths {
            self.ex
                .add_edge(FILE_ENTITY, RelationshipKind::Imports, &path, line);
        }
    }

    fn use_paths(&self, node: Node<'_>, prefix: &str, out: &mut Vec<String>) {
        let join = |rest: &str| {
            if prefix.is_empty() {
                rest.to_string()
            } else {
                format!("{prefix}::{rest}")
            }
        };
        match node.kind() {
            USE_AS_CLAUSE => {
                if let Some(path) = node.child_by_field_name("path") {
                    out.push(join(self.text(&path)));
                }
            }
            USE_LIST => {
                for child in named_children(&node) {
                    self.use_paths(child, prefix, out);
                }
            }
            SCOPED_USE_LIST => {
                let nested = node
                    .child_by_field_name("path")
                    .map_or_else(|| prefix.to_string(), |p| join(self.text(&p)));
                if let Some(list) = node.child_by_field_name("list") {
                    self.use_paths(list, &nested, out);
                }
            }
            USE_WILDCARD => out.push(join(self.text(&node))),
            _ => out.push(join(self.text(&node))),
        }
    }
}

/// Last `::` segment of a path.
fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

/// `Foo` from `&mut crate::a::Foo<T>`.
fn base_type_name(text: &str) -> &str {
    let without_generics = text.split('<').next().unwrap_or(text);
    let trimmed = without_generics
        .trim_start_matches('&')
        .trim_start_matches("mut ")
        .trim_start_matches("dyn ")
        .trim();
    last_segment(trimmed)
}

fn starts_uppercase(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}
