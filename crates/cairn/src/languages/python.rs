//! Python language support for Cairn.
//!
//! Extracts classes, functions, methods, and class/instance attributes using
//! tree-sitter-python. Docstrings are captured into entity metadata.

use std::path::Path;

use tree_sitter::Node;

use super::common::{Extraction, ExtractedEntity, FILE_ENTITY};
use super::tree_sitter_utils::{
    cyclomatic, end_line, has_token, line_count, named_children, node_text, signature_before,
    start_line, walk_descendants,
};
use super::LanguageExtractor;
use crate::types::{EntityKind, EntityMetadata, Language, RelationshipKind, TypeFlavor};

/// Tree-sitter node kind constants for the Python grammar.
mod node_kinds {
    pub const FUNCTION_DEFINITION: &str = "function_definition";
    pub const CLASS_DEFINITION: &str = "class_definition";
    pub const DECORATED_DEFINITION: &str = "decorated_definition";
    pub const DECORATOR: &str = "decorator";
    pub const IMPORT_STATEMENT: &str = "import_statement";
    pub const IMPORT_FROM_STATEMENT: &str = "import_from_statement";
    pub const ALIASED_IMPORT: &str = "aliased_import";
    pub const WILDCARD_IMPORT: &str = "wildcard_import";
    pub const EXPRESSION_STATEMENT: &str = "expression_statement";
    pub const ASSIGNMENT: &str = "assignment";
    pub const STRING: &str = "string";

    // Parameters
    pub const IDENTIFIER: &str = "identifier";
    pub const TYPED_PARAMETER: &str = "typed_parameter";
    pub const DEFAULT_PARAMETER: &str = "default_parameter";
    pub const TYPED_DEFAULT_PARAMETER: &str = "typed_default_parameter";

    // Expressions
    pub const CALL: &str = "call";
    pub const ATTRIBUTE: &str = "attribute";
    pub const RAISE_STATEMENT: &str = "raise_statement";
    pub const EXCEPT_CLAUSE: &str = "except_clause";
    pub const AS_PATTERN: &str = "as_pattern";
    pub const TUPLE: &str = "tuple";
    pub const BLOCK: &str = "block";

    /// Nodes that add a branch to a function's control flow.
    pub const DECISION_KINDS: &[&str] = &[
        "if_statement",
        "elif_clause",
        "for_statement",
        "while_statement",
        "except_clause",
        "conditional_expression",
        "boolean_operator",
        "case_clause",
    ];
}

use node_kinds::{
    ALIASED_IMPORT, AS_PATTERN, ASSIGNMENT, ATTRIBUTE, BLOCK, CALL, CLASS_DEFINITION,
    DECISION_KINDS, DECORATED_DEFINITION, DECORATOR, DEFAULT_PARAMETER, EXCEPT_CLAUSE,
    EXPRESSION_STATEMENT, FUNCTION_DEFINITION, IDENTIFIER, IMPORT_FROM_STATEMENT,
    IMPORT_STATEMENT, RAISE_STATEMENT, STRING, TUPLE, TYPED_DEFAULT_PARAMETER, TYPED_PARAMETER,
    WILDCARD_IMPORT,
};

/// Python language support implementation.
pub struct PythonExtractor;

impl LanguageExtractor for PythonExtractor {
    fn language(&self) -> Language {
        Language::Python
    }

    fn tree_sitter_language(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn extract_tree(&self, tree: &tree_sitter::Tree, source: &str, path: &Path) -> Extraction {
        let root = tree.root_node();
        let mut walker = Walker {
            source,
            ex: Extraction::new(path, Language::Python, line_count(&root)),
        };
        walker.visit_block(root, FILE_ENTITY, None);
        walker.ex
    }
}

struct Walker<'s> {
    source: &'s str,
    ex: Extraction,
}

#[derive(Clone, Copy)]
struct Owner<'a> {
    name: &'a str,
    index: usize,
}

/// One parameter with its optional annotation.
struct Param<'t> {
    name: String,
    annotation: Option<Node<'t>>,
}

impl<'s> Walker<'s> {
    fn text(&self, node: &Node<'_>) -> &'s str {
        node_text(node, self.source)
    }

    fn visit_block(&mut self, block: Node<'_>, parent: usize, owner: Option<Owner<'_>>) {
        for child in named_children(&block) {
            match child.kind() {
                FUNCTION_DEFINITION => {
                    self.function(child, parent, owner, &[]);
                }
                CLASS_DEFINITION => {
                    self.class(child, parent, owner, &[]);
                }
                DECORATED_DEFINITION => self.decorated(child, parent, owner),
                IMPORT_STATEMENT | IMPORT_FROM_STATEMENT => self.import(child),
                EXPRESSION_STATEMENT => {
                    if let Some(o) = owner {
                        self.class_attribute(child, o);
                    }
                }
                _ => {}
            }
        }
    }

    fn decorated(&mut self, node: Node<'_>, parent: usize, owner: Option<Owner<'_>>) {
        let decorators: Vec<(String, u32)> = named_children(&node)
            .into_iter()
            .filter(|c| c.kind() == DECORATOR)
            .filter_map(|d| {
                let expr = d.named_child(0)?;
                let target = if expr.kind() == CALL {
                    expr.child_by_field_name("function")?
                } else {
                    expr
                };
                Some((self.text(&target).to_string(), start_line(&d)))
            })
            .collect();
        let Some(definition) = node.child_by_field_name("definition") else {
            return;
        };
        match definition.kind() {
            FUNCTION_DEFINITION => self.function(definition, parent, owner, &decorators),
            CLASS_DEFINITION => self.class(definition, parent, owner, &decorators),
            _ => {}
        }
    }

    fn docstring(&self, body: Option<Node<'_>>) -> Option<String> {
        let first = body?.named_child(0)?;
        if first.kind() != EXPRESSION_STATEMENT {
            return None;
        }
        let string = first.named_child(0)?;
        if string.kind() != STRING {
            return None;
        }
        let raw = self.text(&string);
        let trimmed = raw
            .trim_start_matches(['r', 'u', 'b', 'R', 'U', 'B'])
            .trim_start_matches("\"\"\"")
            .trim_start_matches("'''")
            .trim_end_matches("\"\"\"")
            .trim_end_matches("'''")
            .trim_matches(['"', '\''])
            .trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn parameters<'t>(&self, node: &Node<'t>) -> Vec<Param<'t>> {
        let Some(params) = node.child_by_field_name("parameters") else {
            return Vec::new();
        };
        named_children(&params)
            .into_iter()
            .filter_map(|p| match p.kind() {
                IDENTIFIER => Some(Param {
                    name: self.text(&p).to_string(),
                    annotation: None,
                }),
                TYPED_PARAMETER => Some(Param {
                    name: p
                        .named_child(0)
                        .map(|n| self.text(&n).to_string())
                        .unwrap_or_default(),
                    annotation: p.child_by_field_name("type"),
                }),
                DEFAULT_PARAMETER | TYPED_DEFAULT_PARAMETER => Some(Param {
                    name: p
                        .child_by_field_name("name")
                        .map(|n| self.text(&n).to_string())
                        .unwrap_or_default(),
                    annotation: p.child_by_field_name("type"),
                }),
                _ => None,
            })
            .collect()
    }

    fn function(
        &mut self,
        node: Node<'_>,
        parent: usize,
        owner: Option<Owner<'_>>,
        decorators: &[(String, u32)],
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let simple = self.text(&name_node).to_string();
        let qualified = match owner {
            Some(o) => format!("{}.{simple}", o.name),
            None => simple.clone(),
        };
        let body = node.child_by_field_name("body");
        let is_static = decorators
            .iter()
            .any(|(d, _)| d == "staticmethod" || d == "classmethod");
        let params: Vec<Param<'_>> = self
            .parameters(&node)
            .into_iter()
            .filter(|p| !(owner.is_some() && (p.name == "self" || p.name == "cls")))
            .collect();
        let is_init = owner.is_some() && simple == "__init__";

        let entity = ExtractedEntity {
            kind: EntityKind::Method,
            flavor: None,
            name: qualified,
            simple_name: simple.clone(),
            start_line: start_line(&node),
            end_line: end_line(&node),
            signature: Some(signature_before(&node, body, self.source)),
            metadata: EntityMetadata {
                is_async: has_token(&node, "async"),
                is_static,
                visibility: Some(visibility(&simple).to_string()),
                complexity: Some(cyclomatic(body, DECISION_KINDS)),
                line_count: Some(line_count(&node)),
                parameter_count: Some(u32::try_from(params.len()).unwrap_or(u32::MAX)),
                docstring: self.docstring(body),
            },
        };
        let index = self.ex.add_entity(parent, entity);

        for (decorator, line) in decorators {
            self.ex
                .add_edge(index, RelationshipKind::HasAttribute, decorator, *line);
        }
        let param_kind = if is_init {
            RelationshipKind::Injects
        } else {
            RelationshipKind::UsesType
        };
        for param in &params {
            if let Some(annotation) = param.annotation {
                let text = self.text(&annotation);
                self.ex
                    .add_type_edges(index, param_kind, text, start_line(&annotation));
            }
        }
        if let Some(ret) = node.child_by_field_name("return_type") {
            let text = self.text(&ret);
            self.ex
                .add_type_edges(index, RelationshipKind::ReturnsType, text, start_line(&ret));
        }
        if let Some(body) = body {
            self.body(body, index, owner);
        }
    }

    fn class(
        &mut self,
        node: Node<'_>,
        parent: usize,
        owner: Option<Owner<'_>>,
        decorators: &[(String, u32)],
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let simple = self.text(&name_node).to_string();
        let qualified = match owner {
            Some(o) => format!("{}.{simple}", o.name),
            None => simple.clone(),
        };
        let body = node.child_by_field_name("body");
        let entity = ExtractedEntity {
            kind: EntityKind::Type,
            flavor: Some(TypeFlavor::Class),
            name: qualified.clone(),
            simple_name: simple.clone(),
            start_line: start_line(&node),
            end_line: end_line(&node),
            signature: Some(signature_before(&node, body, self.source)),
            metadata: EntityMetadata {
                visibility: Some(visibility(&simple).to_string()),
                line_count: Some(line_count(&node)),
                docstring: self.docstring(body),
                ..EntityMetadata::default()
            },
        };
        let index = self.ex.add_entity(parent, entity);

        for (decorator, line) in decorators {
            self.ex
                .add_edge(index, RelationshipKind::HasAttribute, decorator, *line);
        }
        if let Some(bases) = node.child_by_field_name("superclasses") {
            for base in named_children(&bases) {
                if !matches!(base.kind(), IDENTIFIER | ATTRIBUTE) {
                    // keyword arguments such as metaclass=
                    continue;
                }
                let name = last_segment(self.text(&base));
                if name != "object" {
                    self.ex
                        .add_edge(index, RelationshipKind::Inherits, name, start_line(&base));
                }
            }
        }
        if let Some(body) = body {
            let nested = Owner {
                name: &qualified,
                index,
            };
            self.visit_block(body, index, Some(nested));
        }
    }

    /// `x = 1` or `x: Foo = ...` directly in a class body.
    fn class_attribute(&mut self, statement: Node<'_>, owner: Owner<'_>) {
        let Some(assignment) = statement.named_child(0) else {
            return;
        };
        if assignment.kind() != ASSIGNMENT {
            return;
        }
        let Some(left) = assignment.child_by_field_name("left") else {
            return;
        };
        if left.kind() != IDENTIFIER {
            return;
        }
        let name = self.text(&left);
        self.attribute_entity(owner, name, &assignment);
    }

    fn attribute_entity(&mut self, owner: Owner<'_>, name: &str, assignment: &Node<'_>) {
        let qualified = format!("{}.{name}", owner.name);
        if self.ex.find_by_name(&qualified).is_some() {
            return;
        }
        let entity = ExtractedEntity {
            kind: EntityKind::Property,
            flavor: None,
            name: qualified,
            simple_name: name.to_string(),
            start_line: start_line(assignment),
            end_line: end_line(assignment),
            signature: Some(signature_before(assignment, None, self.source)),
            metadata: EntityMetadata {
                visibility: Some(visibility(name).to_string()),
                ..EntityMetadata::default()
            },
        };
        let index = self.ex.add_entity(owner.index, entity);
        if let Some(ty) = assignment.child_by_field_name("type") {
            let text = self.text(&ty);
            self.ex
                .add_type_edges(index, RelationshipKind::UsesType, text, start_line(&ty));
        }
    }

    /// Calls, raises, excepts, and `self.x =` attributes inside a function body.
    fn body(&mut self, body: Node<'_>, from: usize, owner: Option<Owner<'_>>) {
        let mut nodes = Vec::new();
        walk_descendants(body, |n| {
            if matches!(n.kind(), CALL | RAISE_STATEMENT | EXCEPT_CLAUSE | ASSIGNMENT) {
                nodes.push(n);
            }
            true
        });

        for node in nodes {
            let line = start_line(&node);
            match node.kind() {
                CALL => self.call(node, from, owner, line),
                RAISE_STATEMENT => {
                    let Some(raised) = node.named_child(0) else {
                        continue;
                    };
                    let target = if raised.kind() == CALL {
                        raised.child_by_field_name("function")
                    } else {
                        Some(raised)
                    };
                    if let Some(target) = target {
                        let name = last_segment(self.text(&target));
                        self.ex.add_edge(from, RelationshipKind::Throws, name, line);
                    }
                }
                EXCEPT_CLAUSE => {
                    for caught in self.caught_types(node) {
                        self.ex.add_edge(from, RelationshipKind::Catches, &caught, line);
                    }
                }
                ASSIGNMENT => {
                    let Some(owner) = owner else { continue };
                    let Some(left) = node.child_by_field_name("left") else {
                        continue;
                    };
                    if left.kind() != ATTRIBUTE {
                        continue;
                    }
                    let (Some(object), Some(attr)) = (
                        left.child_by_field_name("object"),
                        left.child_by_field_name("attribute"),
                    ) else {
                        continue;
                    };
                    if self.text(&object) == "self" {
                        let name = self.text(&attr);
                        self.attribute_entity(owner, name, &node);
                    }
                }
                _ => {}
            }
        }
    }

    fn call(&mut self, node: Node<'_>, from: usize, owner: Option<Owner<'_>>, line: u32) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        match function.kind() {
            IDENTIFIER => {
                let name = self.text(&function);
                self.ex.add_call(from, name, None, None, line);
            }
            ATTRIBUTE => {
                let (Some(object), Some(attr)) = (
                    function.child_by_field_name("object"),
                    function.child_by_field_name("attribute"),
                ) else {
                    return;
                };
                let receiver = self.text(&object).to_string();
                let inferred = if receiver == "self" || receiver == "cls" {
                    owner.map(|o| o.name.to_string())
                } else if object.kind() == CALL {
                    object
                        .child_by_field_name("function")
                        .filter(|f| f.kind() == IDENTIFIER)
                        .map(|f| self.text(&f))
                        .filter(|name| name.chars().next().is_some_and(char::is_uppercase))
                        .map(ToString::to_string)
                } else {
                    None
                };
                let method = self.text(&attr);
                self.ex.add_call(from, method, Some(receiver), inferred, line);
            }
            _ => {}
        }
    }

    fn caught_types(&self, clause: Node<'_>) -> Vec<String> {
        let Some(first) = named_children(&clause)
            .into_iter()
            .find(|c| c.kind() != BLOCK)
        else {
            return Vec::new();
        };
        let expr = if first.kind() == AS_PATTERN {
            match first.named_child(0) {
                Some(inner) => inner,
                None => return Vec::new(),
            }
        } else {
            first
        };
        let nodes = if expr.kind() == TUPLE {
            named_children(&expr)
        } else {
            vec![expr]
        };
        nodes
            .iter()
            .filter(|n| matches!(n.kind(), IDENTIFIER | ATTRIBUTE))
            .map(|n| last_segment(self.text(n)).to_string())
            .collect()
    }

    fn import(&mut self, node: Node<'_>) {
        let line = start_line(&node);
        let module = node
            .child_by_field_name("module_name")
            .map(|m| self.text(&m).to_string());
        let mut targets = Vec::new();
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            let name_node = if name.kind() == ALIASED_IMPORT {
                match name.child_by_field_name("name") {
                    Some(n) => n,
                    None => continue,
                }
            } else {
                name
            };
            let text = self.text(&name_node);
            targets.push(match &module {
                Some(m) => format!("{m}.{text}"),
                None => text.to_string(),
            });
        }
        if targets.is_empty() {
            if let Some(m) = module {
                let wildcard = named_children(&node)
                    .iter()
                    .any(|c| c.kind() == WILDCARD_IMPORT);
                targets.push(if wildcard { format!("{m}.*") } else { m });
            }
        }
        for target in targets {
            self.ex
                .add_edge(FILE_ENTITY, RelationshipKind::Imports, &target, line);
        }
    }
}

/// Leading underscore (but not dunder) marks a private name.
fn visibility(name: &str) -> &'static str {
    let dunder = name.starts_with("__") && name.ends_with("__");
    if name.starts_with('_') && !dunder {
        "private"
    } else {
        "public"
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(code: &str) -> Extraction {
        crate::languages::extract(code, Path::new("app/models.py"), Language::Python)
            .expect("test code should parse")
    }

    fn entity<'a>(ex: &'a Extraction, name: &str) -> &'a ExtractedEntity {
        ex.entities
            .iter()
            .find(|e| e.name == name)
            .unwrap_or_else(|| panic!("entity {name} not found"))
    }

    fn edges(ex: &Extraction, kind: RelationshipKind) -> Vec<(String, String)> {
        ex.relationships_of(kind)
            .map(|r| (ex.entities[r.from].name.clone(), ex.target_name(r).to_string()))
            .collect()
    }

    fn pair(a: &str, b: &str) -> (String, String) {
        (a.to_string(), b.to_string())
    }

    #[test]
    fn extracts_classes_methods_and_docstrings() {
        let ex = extract(
            "class Repo(Base):\n    \"\"\"Stores things.\"\"\"\n\n    def save(self, item: Item) -> bool:\n        \"\"\"Persist one item.\"\"\"\n        return True\n",
        );

        let repo = entity(&ex, "Repo");
        assert_eq!(repo.flavor, Some(TypeFlavor::Class));
        assert_eq!(repo.metadata.docstring.as_deref(), Some("Stores things."));
        let save = entity(&ex, "Repo.save");
        assert_eq!(save.kind, EntityKind::Method);
        assert_eq!(save.metadata.docstring.as_deref(), Some("Persist one item."));
        assert_eq!(save.metadata.parameter_count, Some(1));
        assert_eq!(edges(&ex, RelationshipKind::Inherits), vec![pair("Repo", "Base")]);
        assert_eq!(
            edges(&ex, RelationshipKind::UsesType),
            vec![pair("Repo.save", "Item")]
        );
        assert!(edges(&ex, RelationshipKind::ReturnsType).is_empty());
    }

    #[test]
    fn async_functions_are_flagged() {
        let ex = extract("async def fetch(url):\n    return await get(url)\n");
        assert!(entity(&ex, "fetch").metadata.is_async);
        assert!(!entity(&ex, "fetch").metadata.is_static);
    }

    #[test]
    fn init_params_are_injected_and_self_attributes_extracted() {
        let ex = extract(
            "class Service:\n    retries = 3\n\n    def __init__(self, repo: Repository, clock: Clock = None):\n        self.repo = repo\n        self._clock = clock\n",
        );

        assert_eq!(
            edges(&ex, RelationshipKind::Injects),
            vec![
                pair("Service.__init__", "Repository"),
                pair("Service.__init__", "Clock")
            ]
        );
        assert_eq!(entity(&ex, "Service.retries").kind, EntityKind::Property);
        assert_eq!(entity(&ex, "Service.repo").kind, EntityKind::Property);
        assert_eq!(
            entity(&ex, "Service._clock").metadata.visibility.as_deref(),
            Some("private")
        );
        assert_eq!(
            entity(&ex, "Service.__init__").metadata.visibility.as_deref(),
            Some("public")
        );
    }

    #[test]
    fn decorators_raises_and_excepts() {
        let ex = extract(
            "class Jobs:\n    @staticmethod\n    @retry(times=3)\n    def run():\n        try:\n            work()\n        except (IOError, errors.Timeout) as e:\n            raise JobFailed(str(e))\n",
        );

        let run = entity(&ex, "Jobs.run");
        assert!(run.metadata.is_static);
        assert_eq!(
            edges(&ex, RelationshipKind::HasAttribute),
            vec![pair("Jobs.run", "staticmethod"), pair("Jobs.run", "retry")]
        );
        assert_eq!(
            edges(&ex, RelationshipKind::Catches),
            vec![pair("Jobs.run", "IOError"), pair("Jobs.run", "Timeout")]
        );
        assert_eq!(
            edges(&ex, RelationshipKind::Throws),
            vec![pair("Jobs.run", "JobFailed")]
        );
    }

    #[test]
    fn calls_record_receivers() {
        let ex = extract(
            "class A:\n    def go(self, client):\n        self.prep()\n        client.send()\n        Builder().build()\n",
        );

        let calls: Vec<_> = ex.relationships_of(RelationshipKind::Calls).collect();
        let find = |t: &str| {
            calls
                .iter()
                .find(|r| ex.target_name(r) == t)
                .unwrap_or_else(|| panic!("no call to {t}"))
        };
        assert_eq!(find("prep").properties.inferred_type.as_deref(), Some("A"));
        assert_eq!(find("send").properties.receiver.as_deref(), Some("client"));
        assert_eq!(find("send").properties.inferred_type, None);
        assert_eq!(
            find("build").properties.inferred_type.as_deref(),
            Some("Builder")
        );
        find("Builder");
    }

    #[test]
    fn imports_are_recorded() {
        let ex = extract(
            "import os.path\nfrom app.db import Session, engine as eng\nfrom x import *\n",
        );

        let imports: Vec<String> = edges(&ex, RelationshipKind::Imports)
            .into_iter()
            .map(|(_, t)| t)
            .collect();
        assert_eq!(
            imports,
            vec!["os.path", "app.db.Session", "app.db.engine", "x.*"]
        );
    }
}
