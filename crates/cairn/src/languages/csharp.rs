//! C# language support for Cairn.
//!
//! Implements entity and relationship extraction for C# source files using
//! tree-sitter-c-sharp. Namespaces scope nothing: types are named by their
//! (possibly nested) type path, members as `Type.Member`.

use std::path::Path;

use tree_sitter::Node;

use super::common::{Extraction, ExtractedEntity, FILE_ENTITY};
use super::tree_sitter_utils::{
    cyclomatic, end_line, line_count, named_children, node_text, signature_before, start_line,
    walk_descendants,
};
use super::LanguageExtractor;
use crate::types::{EntityKind, EntityMetadata, Language, RelationshipKind, TypeFlavor};

/// Tree-sitter node kind constants for C# grammar.
///
/// These match the node types defined in tree-sitter-c-sharp. Using constants
/// prevents typos and makes supported node types explicit.
mod node_kinds {
    // Type declarations
    pub const CLASS_DECLARATION: &str = "class_declaration";
    pub const STRUCT_DECLARATION: &str = "struct_declaration";
    pub const INTERFACE_DECLARATION: &str = "interface_declaration";
    pub const ENUM_DECLARATION: &str = "enum_declaration";
    pub const RECORD_DECLARATION: &str = "record_declaration";
    pub const RECORD_STRUCT_DECLARATION: &str = "record_struct_declaration";

    // Members
    pub const METHOD_DECLARATION: &str = "method_declaration";
    pub const CONSTRUCTOR_DECLARATION: &str = "constructor_declaration";
    pub const PROPERTY_DECLARATION: &str = "property_declaration";
    pub const FIELD_DECLARATION: &str = "field_declaration";
    pub const VARIABLE_DECLARATION: &str = "variable_declaration";
    pub const VARIABLE_DECLARATOR: &str = "variable_declarator";

    // Namespaces & imports
    pub const NAMESPACE_DECLARATION: &str = "namespace_declaration";
    pub const FILE_SCOPED_NAMESPACE_DECLARATION: &str = "file_scoped_namespace_declaration";
    pub const USING_DIRECTIVE: &str = "using_directive";

    // Expressions & statements
    pub const INVOCATION_EXPRESSION: &str = "invocation_expression";
    pub const OBJECT_CREATION_EXPRESSION: &str = "object_creation_expression";
    pub const MEMBER_ACCESS_EXPRESSION: &str = "member_access_expression";
    pub const THIS_EXPRESSION: &str = "this_expression";
    pub const THROW_STATEMENT: &str = "throw_statement";
    pub const THROW_EXPRESSION: &str = "throw_expression";
    pub const CATCH_DECLARATION: &str = "catch_declaration";

    // Types & identifiers
    pub const IDENTIFIER: &str = "identifier";
    pub const GENERIC_NAME: &str = "generic_name";
    pub const PRIMARY_CONSTRUCTOR_BASE_TYPE: &str = "primary_constructor_base_type";

    // Structure
    pub const DECLARATION_LIST: &str = "declaration_list";
    pub const PARAMETER: &str = "parameter";
    pub const MODIFIER: &str = "modifier";
    pub const BASE_LIST: &str = "base_list";
    pub const ATTRIBUTE_LIST: &str = "attribute_list";
    pub const ATTRIBUTE: &str = "attribute";
    pub const COMMENT: &str = "comment";

    /// Nodes that add a branch to a method's control flow.
    pub const DECISION_KINDS: &[&str] = &[
        "if_statement",
        "while_statement",
        "for_statement",
        "foreach_statement",
        "do_statement",
        "switch_section",
        "switch_expression_arm",
        "catch_clause",
        "conditional_expression",
    ];
}

use node_kinds::{
    ATTRIBUTE, ATTRIBUTE_LIST, BASE_LIST, CATCH_DECLARATION, CLASS_DECLARATION, COMMENT,
    CONSTRUCTOR_DECLARATION, DECISION_KINDS, DECLARATION_LIST, ENUM_DECLARATION,
    FIELD_DECLARATION, FILE_SCOPED_NAMESPACE_DECLARATION, GENERIC_NAME, IDENTIFIER,
    INTERFACE_DECLARATION, INVOCATION_EXPRESSION, MEMBER_ACCESS_EXPRESSION, METHOD_DECLARATION,
    MODIFIER, NAMESPACE_DECLARATION, OBJECT_CREATION_EXPRESSION, PARAMETER,
    PRIMARY_CONSTRUCTOR_BASE_TYPE, PROPERTY_DECLARATION, RECORD_DECLARATION,
    RECORD_STRUCT_DECLARATION, STRUCT_DECLARATION, THIS_EXPRESSION, THROW_EXPRESSION,
    THROW_STATEMENT, USING_DIRECTIVE, VARIABLE_DECLARATION, VARIABLE_DECLARATOR,
};

/// C# language support implementation.
pub struct CSharpExtractor;

impl LanguageExtractor for CSharpExtractor {
    fn language(&self) -> Language {
        Language::CSharp
    }

    fn tree_sitter_language(&self) -> tree_sitter::Language {
        tree_sitter_c_sharp::LANGUAGE.into()
    }

    fn extract_tree(&self, tree: &tree_sitter::Tree, source: &str, path: &Path) -> Extraction {
        let root = tree.root_node();
        let mut walker = Walker {
            source,
            ex: Extraction::new(path, Language::CSharp, line_count(&root)),
        };
        walker.visit_declarations(root, FILE_ENTITY, None);
        walker.ex
    }
}

struct Walker<'s> {
    source: &'s str,
    ex: Extraction,
}

/// Enclosing type while members are walked.
#[derive(Clone, Copy)]
struct Owner<'a> {
    name: &'a str,
    index: usize,
}

fn flavor_of(kind: &str) -> Option<TypeFlavor> {
    match kind {
        CLASS_DECLARATION => Some(TypeFlavor::Class),
        STRUCT_DECLARATION => Some(TypeFlavor::Struct),
        INTERFACE_DECLARATION => Some(TypeFlavor::Interface),
        ENUM_DECLARATION => Some(TypeFlavor::Enum),
        RECORD_DECLARATION | RECORD_STRUCT_DECLARATION => Some(TypeFlavor::Record),
        _ => None,
    }
}

impl<'s> Walker<'s> {
    fn text(&self, node: &Node<'_>) -> &'s str {
        node_text(node, self.source)
    }

    /// Walk a container of declarations: compilation unit, namespace body, or type body.
    fn visit_declarations(&mut self, container: Node<'_>, parent: usize, owner: Option<Owner<'_>>) {
        let mut docs: Vec<String> = Vec::new();

        for child in named_children(&container) {
            let kind = child.kind();
            if kind == COMMENT {
                match self.text(&child).strip_prefix("///") {
                    Some(doc) => docs.push(strip_xml(doc.trim())),
                    None => docs.clear(),
                }
                continue;
            }
            let doc = (!docs.is_empty()).then(|| docs.join(" ").trim().to_string());
            docs.clear();

            if let Some(flavor) = flavor_of(kind) {
                self.type_declaration(child, parent, owner, flavor, doc);
                continue;
            }
            match kind {
                USING_DIRECTIVE => self.using_directive(child),
                NAMESPACE_DECLARATION | FILE_SCOPED_NAMESPACE_DECLARATION => {
                    // File-scoped namespaces may hold their members as direct children.
                    let body = child
                        .child_by_field_name("body")
                        .unwrap_or(child);
                    self.visit_declarations(body, parent, owner);
                }
                DECLARATION_LIST => self.visit_declarations(child, parent, owner),
                METHOD_DECLARATION | CONSTRUCTOR_DECLARATION => {
                    if let Some(o) = owner {
                        self.method(child, o, doc);
                    }
                }
                PROPERTY_DECLARATION => {
                    if let Some(o) = owner {
                        self.property(child, o, doc);
                    }
                }
                FIELD_DECLARATION => {
                    if let Some(o) = owner {
                        self.field(child, o);
                    }
                }
                _ => {}
            }
        }
    }

    fn has_modifier(&self, node: &Node<'_>, modifier: &str) -> bool {
        named_children(node)
            .iter()
            .any(|c| c.kind() == MODIFIER && self.text(c) == modifier)
    }

    /// Handles compound visibility modifiers like `protected internal`.
    fn visibility(&self, node: &Node<'_>) -> String {
        let has = |m: &str| self.has_modifier(node, m);
        match (has("public"), has("protected"), has("internal"), has("private")) {
            (true, _, _, _) => "public",
            (_, true, true, _) => "protected internal",
            (_, true, _, true) => "private protected",
            (_, _, true, _) => "internal",
            (_, true, _, _) => "protected",
            _ => "private",
        }
        .to_string()
    }

    fn attributes(&mut self, node: &Node<'_>, index: usize) {
        for list in named_children(node) {
            if list.kind() != ATTRIBUTE_LIST {
                continue;
            }
            for attr in named_children(&list) {
                if attr.kind() != ATTRIBUTE {
                    continue;
                }
                let name = attr
                    .child_by_field_name("name")
                    .map_or_else(|| self.text(&attr), |n| self.text(&n));
                self.ex
                    .add_edge(index, RelationshipKind::HasAttribute, name, start_line(&attr));
            }
        }
    }

    fn body_of<'t>(node: &Node<'t>) -> Option<Node<'t>> {
        node.child_by_field_name("body").or_else(|| {
            named_children(node)
                .into_iter()
                .find(|c| c.kind() == DECLARATION_LIST)
        })
    }

    fn type_declaration(
        &mut self,
        node: Node<'_>,
        parent: usize,
        owner: Option<Owner<'_>>,
        flavor: TypeFlavor,
        docstring: Option<String>,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let simple = self.text(&name_node).to_string();
        let qualified = match owner {
            Some(o) => format!("{}.{simple}", o.name),
            None => simple.clone(),
        };
        let body = Self::body_of(&node);
        let entity = ExtractedEntity {
            kind: EntityKind::Type,
            flavor: Some(flavor),
            name: qualified.clone(),
            simple_name: simple,
            start_line: start_line(&node),
            end_line: end_line(&node),
            signature: Some(signature_before(&node, body, self.source)),
            metadata: EntityMetadata {
                is_static: self.has_modifier(&node, "static"),
                visibility: Some(self.visibility(&node)),
                line_count: Some(line_count(&node)),
                docstring,
                ..EntityMetadata::default()
            },
        };
        let index = self.ex.add_entity(parent, entity);
        self.attributes(&node, index);
        self.bases(&node, index, flavor);

        if flavor != TypeFlavor::Enum {
            if let Some(body) = body {
                let nested = Owner {
                    name: &qualified,
                    index,
                };
                self.visit_declarations(body, index, Some(nested));
            }
        }
    }

    /// The first base of a class or record that is not interface-shaped is its base class.
    fn bases(&mut self, node: &Node<'_>, index: usize, flavor: TypeFlavor) {
        let Some(base_list) = named_children(node)
            .into_iter()
            .find(|c| c.kind() == BASE_LIST)
        else {
            return;
        };
        let line = start_line(&base_list);
        for (position, base) in named_children(&base_list).into_iter().enumerate() {
            let base = if base.kind() == PRIMARY_CONSTRUCTOR_BASE_TYPE {
                match base.named_child(0) {
                    Some(inner) => inner,
                    None => continue,
                }
            } else {
                base
            };
            let name = type_base_name(self.text(&base));
            if name.is_empty() {
                continue;
            }
            let inherits = position == 0
                && matches!(flavor, TypeFlavor::Class | TypeFlavor::Record)
                && !looks_like_interface(name);
            let kind = if inherits {
                RelationshipKind::Inherits
            } else {
                RelationshipKind::Implements
            };
            self.ex.add_edge(index, kind, name, line);
        }
    }

    fn method(&mut self, node: Node<'_>, owner: Owner<'_>, docstring: Option<String>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let is_constructor = node.kind() == CONSTRUCTOR_DECLARATION;
        let simple = self.text(&name_node).to_string();
        let body = node.child_by_field_name("body");
        let params: Vec<Node<'_>> = node
            .child_by_field_name("parameters")
            .map(|p| named_children(&p))
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.kind() == PARAMETER)
            .collect();

        let entity = ExtractedEntity {
            kind: EntityKind::Method,
            flavor: None,
            name: format!("{}.{simple}", owner.name),
            simple_name: simple,
            start_line: start_line(&node),
            end_line: end_line(&node),
            signature: Some(signature_before(&node, body, self.source)),
            metadata: EntityMetadata {
                is_async: self.has_modifier(&node, "async"),
                is_static: self.has_modifier(&node, "static"),
                visibility: Some(self.visibility(&node)),
                complexity: Some(cyclomatic(body, DECISION_KINDS)),
                line_count: Some(line_count(&node)),
                parameter_count: Some(u32::try_from(params.len()).unwrap_or(u32::MAX)),
                docstring,
            },
        };
        let index = self.ex.add_entity(owner.index, entity);
        self.attributes(&node, index);

        let param_kind = if is_constructor {
            RelationshipKind::Injects
        } else {
            RelationshipKind::UsesType
        };
        for param in &params {
            if let Some(ty) = param.child_by_field_name("type") {
                let text = self.text(&ty);
                self.ex.add_type_edges(index, param_kind, text, start_line(param));
            }
        }
        if !is_constructor {
            if let Some(ret) = node
                .child_by_field_name("returns")
                .or_else(|| node.child_by_field_name("type"))
            {
                let text = self.text(&ret);
                self.ex
                    .add_type_edges(index, RelationshipKind::ReturnsType, text, start_line(&ret));
            }
        }
        if let Some(body) = body {
            self.body(body, index, owner.name);
        }
    }

    fn property(&mut self, node: Node<'_>, owner: Owner<'_>, docstring: Option<String>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let simple = self.text(&name_node).to_string();
        let entity = ExtractedEntity {
            kind: EntityKind::Property,
            flavor: None,
            name: format!("{}.{simple}", owner.name),
            simple_name: simple,
            start_line: start_line(&node),
            end_line: end_line(&node),
            signature: Some(signature_before(&node, None, self.source)),
            metadata: EntityMetadata {
                is_static: self.has_modifier(&node, "static"),
                visibility: Some(self.visibility(&node)),
                docstring,
                ..EntityMetadata::default()
            },
        };
        let index = self.ex.add_entity(owner.index, entity);
        self.attributes(&node, index);
        if let Some(ty) = node.child_by_field_name("type") {
            let text = self.text(&ty);
            self.ex
                .add_type_edges(index, RelationshipKind::UsesType, text, start_line(&ty));
        }
    }

    fn field(&mut self, node: Node<'_>, owner: Owner<'_>) {
        let Some(declaration) = named_children(&node)
            .into_iter()
            .find(|c| c.kind() == VARIABLE_DECLARATION)
        else {
            return;
        };
        let type_text = declaration
            .child_by_field_name("type")
            .map(|t| self.text(&t));

        for declarator in named_children(&declaration) {
            if declarator.kind() != VARIABLE_DECLARATOR {
                continue;
            }
            let name_node = declarator.child_by_field_name("name").or_else(|| {
                named_children(&declarator)
                    .into_iter()
                    .find(|c| c.kind() == IDENTIFIER)
            });
            let Some(name_node) = name_node else {
                continue;
            };
            let simple = self.text(&name_node).to_string();
            let entity = ExtractedEntity {
                kind: EntityKind::Property,
                flavor: None,
                name: format!("{}.{simple}", owner.name),
                simple_name: simple,
                start_line: start_line(&node),
                end_line: end_line(&node),
                signature: Some(signature_before(&node, None, self.source)),
                metadata: EntityMetadata {
                    is_static: self.has_modifier(&node, "static"),
                    visibility: Some(self.visibility(&node)),
                    ..EntityMetadata::default()
                },
            };
            let index = self.ex.add_entity(owner.index, entity);
            if let Some(ty) = type_text {
                self.ex
                    .add_type_edges(index, RelationshipKind::UsesType, ty, start_line(&node));
            }
        }
    }

    /// Calls, object creations, throws, and catches inside a method body.
    fn body(&mut self, body: Node<'_>, from: usize, self_type: &str) {
        let mut nodes = Vec::new();
        walk_descendants(body, |n| {
            if matches!(
                n.kind(),
                INVOCATION_EXPRESSION
                    | OBJECT_CREATION_EXPRESSION
                    | THROW_STATEMENT
                    | THROW_EXPRESSION
                    | CATCH_DECLARATION
            ) {
                nodes.push(n);
            }
            true
        });

        for node in nodes {
            let line = start_line(&node);
            match node.kind() {
                INVOCATION_EXPRESSION => {
                    if let Some(function) = node.child_by_field_name("function") {
                        self.invocation(function, from, self_type, line);
                    }
                }
                OBJECT_CREATION_EXPRESSION => {
                    if let Some(ty) = node.child_by_field_name("type") {
                        let text = self.text(&ty);
                        self.ex.add_type_edges(from, RelationshipKind::UsesType, text, line);
                    }
                }
                THROW_STATEMENT | THROW_EXPRESSION => {
                    let created = named_children(&node)
                        .into_iter()
                        .find(|c| c.kind() == OBJECT_CREATION_EXPRESSION)
                        .and_then(|c| c.child_by_field_name("type"));
                    if let Some(ty) = created {
                        let name = type_base_name(self.text(&ty));
                        self.ex.add_edge(from, RelationshipKind::Throws, name, line);
                    }
                }
                CATCH_DECLARATION => {
                    if let Some(ty) = node.child_by_field_name("type") {
                        let name = type_base_name(self.text(&ty));
                        self.ex.add_edge(from, RelationshipKind::Catches, name, line);
                    }
                }
                _ => {}
            }
        }
    }

    fn invocation(&mut self, function: Node<'_>, from: usize, self_type: &str, line: u32) {
        match function.kind() {
            IDENTIFIER => {
                let name = self.text(&function);
                self.ex
                    .add_call(from, name, None, Some(self_type.to_string()), line);
            }
            GENERIC_NAME => {
                if let Some(name) = function.named_child(0) {
                    let name = self.text(&name);
                    self.ex
                        .add_call(from, name, None, Some(self_type.to_string()), line);
                }
            }
            MEMBER_ACCESS_EXPRESSION => {
                let (Some(expression), Some(name)) = (
                    function.child_by_field_name("expression"),
                    function.child_by_field_name("name"),
                ) else {
                    return;
                };
                let method = if name.kind() == GENERIC_NAME {
                    name.named_child(0).map_or("", |n| self.text(&n))
                } else {
                    self.text(&name)
                };
                let receiver = self.text(&expression).to_string();
                let inferred = match expression.kind() {
                    THIS_EXPRESSION => Some(self_type.to_string()),
                    OBJECT_CREATION_EXPRESSION => expression
                        .child_by_field_name("type")
                        .map(|t| type_base_name(self.text(&t)).to_string()),
                    _ => None,
                };
                self.ex.add_call(from, method, Some(receiver), inferred, line);
            }
            _ => {}
        }
    }

    fn using_directive(&mut self, node: Node<'_>) {
        let text = self.text(&node);
        let target = text
            .trim_end_matches(';')
            .split('=')
            .next_back()
            .unwrap_or_default()
            .split_whitespace()
            .filter(|w| !matches!(*w, "global" | "using" | "static" | "unsafe"))
            .collect::<String>();
        if !target.is_empty() {
            self.ex
                .add_edge(FILE_ENTITY, RelationshipKind::Imports, &target, start_line(&node));
        }
    }
}

/// `Repository` from `Data.Repository<T>?`.
fn type_base_name(text: &str) -> &str {
    let without_generics = text.split('<').next().unwrap_or(text);
    let trimmed = without_generics.trim().trim_end_matches(['?', '[', ']']);
    trimmed.rsplit('.').next().unwrap_or(trimmed)
}

/// C# interface naming convention: `I` followed by an uppercase letter.
fn looks_like_interface(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next() == Some('I') && chars.next().is_some_and(char::is_uppercase)
}

/// Drop XML doc tags (`<summary>`, `</summary>`).
fn strip_xml(doc: &str) -> String {
    let mut out = String::with_capacity(doc.len());
    let mut in_tag = false;
    for c in doc.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}
