//! Alias resolution, imports and the declaration registry

use std::fs;
use std::path::{Path, PathBuf};

use fun_ast::*;
use fun_lexer::SourceMap;
use fun_parser::{parse_source_with_depth, DEFAULT_MAX_DEPTH};
use tracing::{debug, trace};

use crate::error::{ResolveError, ResolveErrorKind};
use crate::module::{Module, RuntimeAsset, LIBRARY_FILE, RUNTIME_ASSET_FILE, SOURCE_EXTENSION};
use crate::scope::Scope;
use crate::types::Types;

type Result<T> = std::result::Result<T, ResolveError>;

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Directory file imports in the root file are relative to
    pub base_dir: PathBuf,
    /// Directory holding one subdirectory per importable module
    pub modules_root: PathBuf,
    pub minify: bool,
    /// Limit on nesting, counting file and module imports
    pub max_depth: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            modules_root: PathBuf::from("modules"),
            minify: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// A fully resolved program, ready for code generation
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub ast: Vec<Node>,
    /// Modules in the order they were first imported
    pub modules: Vec<Module>,
    /// Every template and handler, indexed by [`DeclId`]
    pub declarations: Vec<Node>,
    pub minify: bool,
}

impl Resolution {
    pub fn declaration(&self, id: DeclId) -> Option<&Node> {
        self.declarations.get(id.0)
    }
}

/// Resolve a parsed program. Imported files are added to `sources`.
pub fn resolve(ast: Vec<Node>, options: ResolveOptions, sources: &mut SourceMap) -> Result<Resolution> {
    Resolver::new(options, sources).resolve_program(ast)
}

/// Like [`resolve`], handing the outcome to `on_done` instead of returning it.
pub fn resolve_with<F>(ast: Vec<Node>, options: ResolveOptions, sources: &mut SourceMap, on_done: F)
where
    F: FnOnce(Result<Resolution>),
{
    on_done(resolve(ast, options, sources))
}

/// One resolution session. Modules and declarations are shared by every
/// file the session pulls in.
pub struct Resolver<'a> {
    options: ResolveOptions,
    sources: &'a mut SourceMap,
    scope: Scope,
    modules: Vec<Module>,
    /// Indexed by [`DeclId`]; a slot stays empty until its node is seen
    declarations: Vec<Option<Node>>,
    types: Types,
    /// Directories of the files being resolved, innermost last
    dirs: Vec<PathBuf>,
    depth: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(options: ResolveOptions, sources: &'a mut SourceMap) -> Self {
        Self {
            options,
            sources,
            scope: Scope::root(),
            modules: Vec::new(),
            declarations: Vec::new(),
            types: Types,
            dirs: Vec::new(),
            depth: 0,
        }
    }

    /// Start from modules an earlier resolution already loaded. Their
    /// imports become no-ops and their templates and handlers keep their ids.
    pub fn with_modules(mut self, modules: Vec<Module>) -> Self {
        for library in modules.iter().filter_map(|m| m.library.as_deref()) {
            for node in library {
                self.seed(node);
            }
        }
        self.modules = modules;
        self
    }

    pub fn resolve_program(mut self, ast: Vec<Node>) -> Result<Resolution> {
        // Fresh ids go after every id the tree already carries
        if let Some(max) = ast.iter().filter_map(max_decl).max() {
            self.reserve(max);
        }
        let ast = self.resolve_block(ast)?;
        debug!(
            modules = self.modules.len(),
            declarations = self.declarations.len(),
            "resolved program"
        );
        let declarations = self
            .declarations
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    ResolveError::new(
                        ResolveErrorKind::MissingDeclaration,
                        Loc::default(),
                        format!("declaration #{} is not defined anywhere in the program or its modules", index),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Resolution {
            ast,
            modules: self.modules,
            declarations,
            minify: self.options.minify,
        })
    }

    fn nested<T>(&mut self, loc: Loc, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= self.options.max_depth {
            return Err(ResolveError::new(
                ResolveErrorKind::TooDeep,
                loc,
                format!("nesting is deeper than the limit of {}", self.options.max_depth),
            ));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn in_child_scope<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let parent = std::mem::take(&mut self.scope);
        self.scope = Scope::with_parent(parent);
        let result = f(self);
        let scope = std::mem::take(&mut self.scope);
        if let Some(parent) = scope.into_parent() {
            self.scope = parent;
        }
        result
    }

    // === Statements ===

    fn resolve_block(&mut self, nodes: Vec<Node>) -> Result<Vec<Node>> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            self.resolve_statement(node, &mut out)?;
        }
        Ok(out)
    }

    fn resolve_statement(&mut self, node: Node, out: &mut Vec<Node>) -> Result<()> {
        let loc = node.loc;
        self.nested(loc, |r| {
            let resolved = match node.kind {
                NodeKind::ImportModule { name } => return r.import_module(&name, loc),
                NodeKind::ImportFile { path } => {
                    out.extend(r.import_file(&path, loc)?);
                    return Ok(());
                }
                NodeKind::Declaration { namespace, value } => r.resolve_declaration(namespace, *value, loc)?,
                NodeKind::ForLoop { iterator, iterable, block } => {
                    r.resolve_for_loop(iterator, *iterable, block, loc)?
                }
                NodeKind::IfStatement { condition, if_block, else_block } => {
                    r.resolve_if(condition, if_block, else_block, loc)?
                }
                NodeKind::Mutation { target, method, args } => {
                    let target = r.resolve_value(*target)?;
                    let args = r.resolve_values(args)?;
                    r.types.infer_by_method(&target, &method);
                    Node::new(NodeKind::Mutation { target: Box::new(target), method, args }, loc)
                }
                // Already counted for this level
                kind => r.resolve_value_inner(Node::new(kind, loc))?,
            };
            out.push(resolved);
            Ok(())
        })
    }

    fn resolve_declaration(&mut self, namespace: Vec<String>, value: Node, loc: Loc) -> Result<Node> {
        let key = namespace.join(".");
        let value = if matches!(value.kind, NodeKind::Template { .. }) {
            // Bound before its body resolves so the body can refer to it
            let mut template = value;
            let fresh = self.register(&mut template);
            self.declare(&key, &template, loc)?;
            let template = self.resolve_callable_body(template)?;
            self.store(fresh, &template);
            self.scope.insert(key, template.clone());
            template
        } else {
            let value = self.resolve_value(value)?;
            self.declare(&key, &value, loc)?;
            value
        };
        Ok(Node::new(NodeKind::Declaration { namespace, value: Box::new(value) }, loc))
    }

    fn declare(&mut self, key: &str, value: &Node, loc: Loc) -> Result<()> {
        if self.scope.declares(key) {
            return Err(ResolveError::new(
                ResolveErrorKind::RepeatDeclaration,
                loc,
                format!("repeat declaration of \"{}\"", key),
            ));
        }
        trace!(key, value = value.kind_name(), "declare");
        self.scope.insert(key.to_string(), value.clone());
        if let NodeKind::NestedAlias { content } = &value.kind {
            for property in content {
                self.declare(&format!("{}.{}", key, property.name), &property.value, loc)?;
            }
        }
        Ok(())
    }

    fn resolve_for_loop(&mut self, iterator: String, iterable: Node, block: Vec<Node>, loc: Loc) -> Result<Node> {
        let at = iterable.loc;
        let iterable = self.resolve_value(iterable)?;
        let found = iterable.described();
        let iterable = match iterable.kind {
            NodeKind::ItemProperty { item, property, .. }
                if property.len() == 1 && matches!(item.kind, NodeKind::Item { .. }) =>
            {
                Node::new(
                    NodeKind::ItemProperty { item, property, ty: Some(self.types.infer_iterable()) },
                    iterable.loc,
                )
            }
            // Lists held by a loop element only exist at runtime
            NodeKind::ItemProperty { item, property, .. } if property.len() == 1 => {
                return Err(ResolveError::new(
                    ResolveErrorKind::UnsupportedIteration,
                    at,
                    format!(
                        "cannot iterate over \"{}\" of {}: only lists in Local or Global are supported",
                        property.join("."),
                        item.described()
                    ),
                ));
            }
            NodeKind::ItemProperty { property, .. } => {
                return Err(ResolveError::new(
                    ResolveErrorKind::UnsupportedIteration,
                    at,
                    format!(
                        "cannot iterate over \"{}\": only one level of item property is supported",
                        property.join(".")
                    ),
                ));
            }
            _ => {
                return Err(ResolveError::new(
                    ResolveErrorKind::UnsupportedIteration,
                    at,
                    format!("can only iterate over a stored list, found {}", found),
                ));
            }
        };

        let element = Node::new(
            NodeKind::RuntimeIterator {
                name: iterator.clone(),
                iterable: Box::new(iterable.clone()),
                ty: Some(self.types.infer_iterator()),
            },
            loc,
        );
        let block = self.in_child_scope(|r| {
            r.declare(&iterator, &element, loc)?;
            r.resolve_block(block)
        })?;

        Ok(Node::new(NodeKind::ForLoop { iterator, iterable: Box::new(iterable), block }, loc))
    }

    fn resolve_if(
        &mut self,
        condition: Condition,
        if_block: Vec<Node>,
        else_block: Option<Vec<Node>>,
        loc: Loc,
    ) -> Result<Node> {
        let left = self.resolve_value(*condition.left)?;
        let comparison = match condition.comparison {
            Some(c) => Some(Comparison {
                comparator: c.comparator,
                right: Box::new(self.resolve_value(*c.right)?),
            }),
            None => None,
        };
        let if_block = self.in_child_scope(|r| r.resolve_block(if_block))?;
        let else_block = match else_block {
            Some(block) => Some(self.in_child_scope(|r| r.resolve_block(block))?),
            None => None,
        };
        Ok(Node::new(
            NodeKind::IfStatement {
                condition: Condition { left: Box::new(left), comparison },
                if_block,
                else_block,
            },
            loc,
        ))
    }

    // === Values ===

    fn resolve_values(&mut self, nodes: Vec<Node>) -> Result<Vec<Node>> {
        nodes.into_iter().map(|node| self.resolve_value(node)).collect()
    }

    fn resolve_value(&mut self, node: Node) -> Result<Node> {
        let loc = node.loc;
        self.nested(loc, |r| r.resolve_value_inner(node))
    }

    fn resolve_value_inner(&mut self, node: Node) -> Result<Node> {
        let Node { kind, loc } = node;
        let kind = match kind {
            NodeKind::Literal { kind, value, .. } => NodeKind::Literal {
                kind,
                value,
                ty: Some(self.types.infer_literal(kind)),
            },
            NodeKind::Alias { namespace } => return self.lookup(&namespace, loc),
            NodeKind::NestedAlias { content } => {
                let content = content
                    .into_iter()
                    .map(|p| -> Result<Property> { Ok(Property { name: p.name, value: self.resolve_value(p.value)? }) })
                    .collect::<Result<_>>()?;
                NodeKind::NestedAlias { content }
            }
            NodeKind::List { content } => NodeKind::List { content: self.resolve_values(content)? },
            NodeKind::Invocation { namespace, args, target } => {
                let target = match target {
                    Some(target) => target,
                    None => self.call_target(&namespace, loc)?,
                };
                NodeKind::Invocation { namespace, args: self.resolve_values(args)?, target: Some(target) }
            }
            NodeKind::Xml { tag, attributes, content, self_closing } => {
                let attributes = attributes
                    .into_iter()
                    .map(|attr| self.resolve_attribute(attr))
                    .collect::<Result<_>>()?;
                let content = self.resolve_block(content)?;
                NodeKind::Xml { tag, attributes, content, self_closing }
            }
            kind @ (NodeKind::Handler { .. } | NodeKind::Template { .. }) => {
                return self.resolve_callable(Node::new(kind, loc));
            }
            NodeKind::RuntimeIterator { name, iterable, .. } => NodeKind::RuntimeIterator {
                name,
                iterable,
                ty: Some(self.types.infer_iterator()),
            },
            // Only the runtime knows what lies behind an item
            kind @ (NodeKind::Item { .. } | NodeKind::ItemProperty { .. }) => kind,
            kind @ (NodeKind::Declaration { .. }
            | NodeKind::ForLoop { .. }
            | NodeKind::IfStatement { .. }
            | NodeKind::Mutation { .. }
            | NodeKind::ImportModule { .. }
            | NodeKind::ImportFile { .. }) => {
                let node = Node::new(kind, loc);
                return Err(ResolveError::new(
                    ResolveErrorKind::MisplacedStatement,
                    loc,
                    format!("{} cannot be used as a value", node.described()),
                ));
            }
        };
        Ok(Node::new(kind, loc))
    }

    fn resolve_attribute(&mut self, attr: Attribute) -> Result<Attribute> {
        match attr {
            Attribute::Assign { name, value } => Ok(Attribute::Assign { name, value: self.resolve_value(value)? }),
            Attribute::Expand { value } => {
                let at = value.loc;
                let value = self.resolve_value(value)?;
                if !matches!(value.kind, NodeKind::NestedAlias { .. }) {
                    return Err(ResolveError::new(
                        ResolveErrorKind::InvalidExpand,
                        at,
                        format!("only an object can be expanded into attributes, found {}", value.described()),
                    ));
                }
                Ok(Attribute::Expand { value })
            }
        }
    }

    /// Walk a dotted alias. The first segment is found along the scope chain;
    /// longer prefixes are looked up in the scope that declared it. Hitting
    /// an item turns the rest of the path into an item property.
    fn lookup(&self, namespace: &[String], loc: Loc) -> Result<Node> {
        let owner = namespace
            .first()
            .and_then(|first| self.scope.owner_of(first))
            .ok_or_else(|| undeclared(namespace, 0, loc))?;

        for i in 0..namespace.len() {
            let key = namespace[..=i].join(".");
            let value = owner.get(&key).ok_or_else(|| undeclared(namespace, i, loc))?;
            let rest = &namespace[i + 1..];

            if rest.is_empty() {
                let mut found = value.clone();
                if matches!(found.kind, NodeKind::Item { .. }) {
                    found.loc = loc;
                }
                return Ok(found);
            }
            if value.is_item() {
                return Ok(Node::new(
                    NodeKind::ItemProperty { item: Box::new(value.clone()), property: rest.to_vec(), ty: None },
                    loc,
                ));
            }
            if let NodeKind::ItemProperty { item, property, .. } = &value.kind {
                let property = property.iter().chain(rest).cloned().collect();
                return Ok(Node::new(NodeKind::ItemProperty { item: item.clone(), property, ty: None }, loc));
            }
        }
        Err(undeclared(namespace, 0, loc))
    }

    fn call_target(&self, namespace: &[String], loc: Loc) -> Result<CallTarget> {
        let callee = self.lookup(namespace, loc)?;
        match &callee.kind {
            NodeKind::Template { decl: Some(decl), .. } => Ok(CallTarget { kind: CallableKind::Template, decl: *decl }),
            NodeKind::Handler { decl: Some(decl), .. } => Ok(CallTarget { kind: CallableKind::Handler, decl: *decl }),
            _ => Err(ResolveError::new(
                ResolveErrorKind::NotInvocable,
                loc,
                format!("\"{}\" is {} and cannot be invoked", namespace.join("."), callee.described()),
            )),
        }
    }

    // === Declaration registry ===

    fn resolve_callable(&mut self, mut node: Node) -> Result<Node> {
        let fresh = self.register(&mut node);
        let node = self.resolve_callable_body(node)?;
        self.store(fresh, &node);
        Ok(node)
    }

    fn resolve_callable_body(&mut self, node: Node) -> Result<Node> {
        let Node { kind, loc } = node;
        let kind = match kind {
            NodeKind::Handler { args, block, decl } => NodeKind::Handler {
                args,
                block: self.in_child_scope(|r| r.resolve_block(block))?,
                decl,
            },
            NodeKind::Template { args, block, decl } => NodeKind::Template {
                args,
                block: self.in_child_scope(|r| r.resolve_block(block))?,
                decl,
            },
            other => other,
        };
        Ok(Node::new(kind, loc))
    }

    /// Give a template or handler a registry slot. Returns the id when this
    /// call filled the slot.
    ///
    /// A node that already carries an id keeps it, so resolving a resolved
    /// tree rebuilds the same registry. Copies of a registered node leave
    /// the slot alone.
    fn register(&mut self, node: &mut Node) -> Option<DeclId> {
        let fresh = DeclId(self.declarations.len());
        let id = match &mut node.kind {
            NodeKind::Template { decl, .. } | NodeKind::Handler { decl, .. } => *decl.get_or_insert(fresh),
            _ => return None,
        };
        self.reserve(id.0);
        if self.declarations[id.0].is_some() {
            return None;
        }
        debug!(decl = id.0, kind = node.kind_name(), "registered declaration");
        self.declarations[id.0] = Some(node.clone());
        Some(id)
    }

    fn store(&mut self, id: Option<DeclId>, node: &Node) {
        if let Some(slot) = id.and_then(|id| self.declarations.get_mut(id.0)) {
            *slot = Some(node.clone());
        }
    }

    /// Make room for slot `index`
    fn reserve(&mut self, index: usize) {
        if index >= self.declarations.len() {
            self.declarations.resize(index + 1, None);
        }
    }

    /// Fill empty slots from an already resolved tree
    fn seed(&mut self, node: &Node) {
        if let NodeKind::Template { decl: Some(id), .. } | NodeKind::Handler { decl: Some(id), .. } = &node.kind {
            self.reserve(id.0);
            if self.declarations[id.0].is_none() {
                self.declarations[id.0] = Some(node.clone());
            }
        }
        for child in node.children() {
            self.seed(child);
        }
    }

    // === Imports ===

    fn import_module(&mut self, name: &str, loc: Loc) -> Result<()> {
        if self.modules.iter().any(|m| m.name == name) {
            debug!(module = name, "module already loaded");
            return Ok(());
        }

        let path = self.options.modules_root.join(name);
        if !path.is_dir() {
            return Err(ResolveError::new(
                ResolveErrorKind::ModuleNotFound,
                loc,
                format!("could not find module \"{}\" at {}", name, path.display()),
            ));
        }
        debug!(module = name, path = %path.display(), "loading module");

        // Recorded before its library resolves so a cycle back to it is a no-op
        let index = self.modules.len();
        self.modules.push(Module {
            name: name.to_string(),
            path: path.clone(),
            library: None,
            asset: RuntimeAsset::placeholder(name),
        });

        let library = path.join(LIBRARY_FILE);
        if library.is_file() {
            let nodes = self.resolve_file(&library, loc)?;
            self.modules[index].library = Some(nodes);
        }
        let script = path.join(RUNTIME_ASSET_FILE);
        if script.is_file() {
            self.modules[index].asset = RuntimeAsset::Script(script);
        }
        Ok(())
    }

    fn import_file(&mut self, path: &str, loc: Loc) -> Result<Vec<Node>> {
        let dir = self.dirs.last().unwrap_or(&self.options.base_dir);
        let file = dir.join(format!("{}.{}", path, SOURCE_EXTENSION));
        if !file.is_file() {
            return Err(ResolveError::new(
                ResolveErrorKind::FileNotFound,
                loc,
                format!("could not find file for import \"{}\" at {}", path, file.display()),
            ));
        }
        debug!(path = %file.display(), "importing file");
        self.resolve_file(&file, loc)
    }

    /// Parse `path` and resolve it into the current scope
    fn resolve_file(&mut self, path: &Path, loc: Loc) -> Result<Vec<Node>> {
        let text = fs::read_to_string(path).map_err(|e| {
            ResolveError::new(ResolveErrorKind::Io, loc, format!("could not read {}: {}", path.display(), e))
        })?;
        let file = self.sources.add(path, text);
        let source = self.sources.text(file).unwrap_or_default();
        let nodes = parse_source_with_depth(source, file, self.options.max_depth)?;

        self.dirs.push(path.parent().map(Path::to_path_buf).unwrap_or_default());
        let result = self.resolve_block(nodes);
        self.dirs.pop();
        result
    }
}

/// Highest declaration id carried anywhere in `node`
fn max_decl(node: &Node) -> Option<usize> {
    let own = match &node.kind {
        NodeKind::Template { decl, .. } | NodeKind::Handler { decl, .. } => decl.map(|id| id.0),
        NodeKind::Invocation { target, .. } => target.map(|t| t.decl.0),
        _ => None,
    };
    node.children().into_iter().filter_map(max_decl).chain(own).max()
}

fn undeclared(namespace: &[String], index: usize, loc: Loc) -> ResolveError {
    let segment = namespace.get(index).map(String::as_str).unwrap_or_default();
    let message = if index == 0 {
        format!("undeclared alias \"{}\"", segment)
    } else {
        format!("undeclared alias \"{}\" on \"{}\"", segment, namespace[..index].join("."))
    };
    ResolveError::new(ResolveErrorKind::UndeclaredAlias, loc, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fun_lexer::FileId;
    use fun_parser::parse_source;
    use std::fs;

    fn resolve_in(dir: &Path, source: &str) -> Result<(Resolution, SourceMap)> {
        let mut sources = SourceMap::new();
        let file = sources.add(dir.join("main.fun"), source);
        let ast = parse_source(source, file).expect("test source should parse");
        let options = ResolveOptions {
            base_dir: dir.to_path_buf(),
            modules_root: dir.join("modules"),
            ..Default::default()
        };
        resolve(ast, options, &mut sources).map(|res| (res, sources))
    }

    fn resolve_str(source: &str) -> Result<Resolution> {
        resolve_in(Path::new("."), source).map(|(res, _)| res)
    }

    fn literal(node: &Node) -> &str {
        match &node.kind {
            NodeKind::Literal { value, .. } => value,
            other => panic!("expected literal, got {:?}", other),
        }
    }

    fn xml_content(node: &Node) -> &[Node] {
        match &node.kind {
            NodeKind::Xml { content, .. } => content,
            other => panic!("expected XML, got {:?}", other),
        }
    }

    #[test]
    fn test_alias_becomes_declared_value() {
        let res = resolve_str("let guy = \"Marcus\"\n<div>guy</div>").unwrap();
        let content = xml_content(&res.ast[1]);
        assert!(matches!(
            &content[0].kind,
            NodeKind::Literal { value, ty: Some(Type::Text), .. } if value == "Marcus"
        ));
        assert!(res.ast.iter().all(|n| !n.has_unresolved()));
    }

    #[test]
    fn test_alias_chains_resolve_eagerly() {
        let res = resolve_str("let a = 1\nlet b = a\nb").unwrap();
        assert!(matches!(&res.ast[2].kind, NodeKind::Literal { ty: Some(Type::Number), .. }));
        assert_eq!(literal(&res.ast[2]), "1");
    }

    #[test]
    fn test_nested_object_properties() {
        let res = resolve_str("let foo = { bar: 1, cat: { name: \"cat\" } }\nfoo\nfoo.bar\nfoo.cat.name").unwrap();
        assert!(matches!(&res.ast[1].kind, NodeKind::NestedAlias { content } if content.len() == 2));
        assert_eq!(literal(&res.ast[2]), "1");
        assert_eq!(literal(&res.ast[3]), "cat");
    }

    #[test]
    fn test_repeat_declaration() {
        let err = resolve_str("let a = 1\nlet a = 2").unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::RepeatDeclaration);
        assert_eq!(err.line, 2);
        assert!(err.message.contains("\"a\""), "{}", err);
    }

    #[test]
    fn test_branches_may_shadow() {
        let res = resolve_str("let a = 1\nif (a) { let a = 2\na } else { a }\na").unwrap();
        match &res.ast[1].kind {
            NodeKind::IfStatement { if_block, else_block, .. } => {
                assert_eq!(literal(&if_block[1]), "2");
                assert_eq!(literal(&else_block.as_ref().unwrap()[0]), "1");
            }
            other => panic!("expected if statement, got {:?}", other),
        }
        assert_eq!(literal(&res.ast[2]), "1");
    }

    #[test]
    fn test_undeclared_alias_names_the_segment() {
        let err = resolve_str("<div>nobody</div>").unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::UndeclaredAlias);
        assert_eq!(err.message, "undeclared alias \"nobody\"");
        assert_eq!((err.line, err.column), (1, 6));

        let err = resolve_str("let foo = { bar: 1 }\nfoo.baz").unwrap_err();
        assert_eq!(err.message, "undeclared alias \"baz\" on \"foo\"");
    }

    #[test]
    fn test_items_stop_property_resolution() {
        let res = resolve_str("Local.user.name\nlet tasks = Local.tasks\ntasks.length").unwrap();
        match &res.ast[0].kind {
            NodeKind::ItemProperty { item, property, .. } => {
                assert!(matches!(item.kind, NodeKind::Item { item: ItemKind::Local }));
                assert_eq!(property, &vec!["user".to_string(), "name".to_string()]);
            }
            other => panic!("expected item property, got {:?}", other),
        }
        assert!(matches!(
            &res.ast[2].kind,
            NodeKind::ItemProperty { property, .. } if property == &["tasks", "length"]
        ));
    }

    #[test]
    fn test_for_loop_binds_iterator_in_body_only() {
        let res = resolve_str("let tasks = Local.tasks\nfor (task in tasks) { <li>task.title</li> }").unwrap();
        match &res.ast[1].kind {
            NodeKind::ForLoop { iterable, block, .. } => {
                assert!(matches!(
                    &iterable.kind,
                    NodeKind::ItemProperty { ty: Some(Type::List(_)), .. }
                ));
                match &xml_content(&block[0])[0].kind {
                    NodeKind::ItemProperty { item, property, .. } => {
                        assert!(matches!(&item.kind, NodeKind::RuntimeIterator { name, .. } if name == "task"));
                        assert_eq!(property, &vec!["title".to_string()]);
                    }
                    other => panic!("expected item property, got {:?}", other),
                }
            }
            other => panic!("expected for loop, got {:?}", other),
        }

        let err = resolve_str("let tasks = Local.tasks\nfor (task in tasks) { }\ntask").unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::UndeclaredAlias);
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_nested_iteration_is_rejected() {
        let err = resolve_str("let rows = Local.table.rows\nfor (row in rows) { }").unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::UnsupportedIteration);

        let err = resolve_str("let n = 3\nfor (x in n) { }").unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::UnsupportedIteration);
        assert!(err.message.contains("literal"), "{}", err);
    }

    #[test]
    fn test_iterating_an_element_property_is_rejected() {
        let source = "let tasks = Local.tasks\nfor (t in tasks) { let subs = t.subs\nfor (s in subs) { <i>s</i> } }";
        let err = resolve_str(source).unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::UnsupportedIteration);
        assert_eq!(err.line, 3);
        assert!(err.message.contains("a runtime iterator"), "{}", err);

        // Separate loops over stored lists are fine
        let source = "let tasks = Local.tasks\nlet tags = Global.tags\nfor (t in tasks) { for (g in tags) { <i>g</i> } }";
        assert!(resolve_str(source).is_ok());
    }

    #[test]
    fn test_templates_and_handlers_are_registered() {
        let source = "let row = template(label) { <li>\"x\"</li> }\n\
                      <button onClick=handler() { Local.count set: 1 }/>\n\
                      row(\"a\")";
        let res = resolve_str(source).unwrap();
        assert_eq!(res.declarations.len(), 2);
        assert!(matches!(res.declarations[0].kind, NodeKind::Template { decl: Some(DeclId(0)), .. }));
        assert!(matches!(res.declarations[1].kind, NodeKind::Handler { decl: Some(DeclId(1)), .. }));
        assert!(matches!(
            &res.ast[2].kind,
            NodeKind::Invocation { target: Some(CallTarget { kind: CallableKind::Template, decl: DeclId(0) }), .. }
        ));
        assert!(res.declarations.iter().all(|n| !n.has_unresolved()));
    }

    #[test]
    fn test_invoking_a_value_fails() {
        let err = resolve_str("let name = \"x\"\nname()").unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::NotInvocable);
        assert_eq!(err.message, "\"name\" is a literal and cannot be invoked");
    }

    #[test]
    fn test_expand_requires_object() {
        let res = resolve_str("let cls = \"cool\"\n<div #{ class: cls }/>").unwrap();
        match &res.ast[1].kind {
            NodeKind::Xml { attributes, .. } => {
                assert!(matches!(&attributes[0], Attribute::Expand { value } if !value.has_unresolved()));
            }
            other => panic!("expected XML, got {:?}", other),
        }

        // Only reachable from a hand-built tree: the grammar always writes an object
        let declare = parse_source("let cls = \"cool\"", FileId(0)).unwrap();
        let div = Node::new(
            NodeKind::Xml {
                tag: "div".to_string(),
                attributes: vec![Attribute::Expand { value: Node::alias(&["cls"], Loc::default()) }],
                content: Vec::new(),
                self_closing: true,
            },
            Loc::default(),
        );
        let ast = declare.into_iter().chain(std::iter::once(div)).collect();
        let err = resolve(ast, ResolveOptions::default(), &mut SourceMap::new()).unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::InvalidExpand);
    }

    #[test]
    fn test_mutation_resolves_target_and_args() {
        let res = resolve_str("let v = \"cat\"\nLocal.foo set: v, 2").unwrap();
        match &res.ast[1].kind {
            NodeKind::Mutation { target, method, args } => {
                assert!(matches!(target.kind, NodeKind::ItemProperty { .. }));
                assert_eq!(method, "set");
                assert_eq!(literal(&args[0]), "cat");
            }
            other => panic!("expected mutation, got {:?}", other),
        }
    }

    #[test]
    fn test_resolving_twice_changes_nothing() {
        let source = "let foo = { bar: 1 }\n\
                      let tasks = Local.tasks\n\
                      let row = template(t) { <li>\"x\"</li> }\n\
                      <ul>for (task in tasks) { <li onClick=handler() { Local.n set: task.id }>task.title</li> }</ul>\n\
                      if (foo.bar == 1) { row(foo.bar) }";
        let first = resolve_str(source).unwrap();
        let mut sources = SourceMap::new();
        let second = resolve(first.ast.clone(), ResolveOptions::default(), &mut sources).unwrap();
        assert_eq!(first.ast, second.ast);
        assert_eq!(first.declarations, second.declarations);
    }

    #[test]
    fn test_resolving_again_keeps_module_declarations() {
        let dir = tempfile::tempdir().unwrap();
        let modules = dir.path().join("modules");
        fs::create_dir_all(modules.join("Badges")).unwrap();
        fs::write(modules.join("Badges/lib.fun"), "let badge = template() { <b>\"new\"</b> }").unwrap();

        let source = "import Badges\n\
                      let row = template() { badge() }\n\
                      <ul onClick=handler() { Local.n set: 1 }>row()</ul>";
        let (first, _) = resolve_in(dir.path(), source).unwrap();
        assert_eq!(first.declarations.len(), 3);

        // The library is not part of the tree, so its template cannot be found
        let err = resolve(first.ast.clone(), ResolveOptions::default(), &mut SourceMap::new()).unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::MissingDeclaration);
        assert!(err.message.contains("#0"), "{}", err);

        let mut sources = SourceMap::new();
        let second = Resolver::new(ResolveOptions::default(), &mut sources)
            .with_modules(first.modules.clone())
            .resolve_program(first.ast.clone())
            .unwrap();
        assert_eq!(second.declarations, first.declarations);
        assert_eq!(second.ast, first.ast);
        assert_eq!(second.modules, first.modules);
    }

    #[test]
    fn test_file_import_is_spliced_in() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("parts")).unwrap();
        fs::write(dir.path().join("parts/header.fun"), "import \"./title\"\n<h1>title</h1>").unwrap();
        fs::write(dir.path().join("parts/title.fun"), "let title = \"Hello\"").unwrap();

        let (res, sources) = resolve_in(dir.path(), "import \"parts/header\"\n<p>title</p>").unwrap();
        assert_eq!(res.ast.len(), 3);
        assert!(matches!(res.ast[0].kind, NodeKind::Declaration { .. }));
        assert_eq!(literal(&xml_content(&res.ast[1])[0]), "Hello");
        assert_eq!(literal(&xml_content(&res.ast[2])[0]), "Hello");
        assert_eq!(sources.len(), 3);
        assert_eq!(res.ast[1].loc.file, FileId(1));
    }

    #[test]
    fn test_missing_file_import() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_in(dir.path(), "import \"nowhere\"").unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::FileNotFound);
    }

    #[test]
    fn test_syntax_error_in_imported_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.fun"), "let a = \n").unwrap();
        let err = resolve_in(dir.path(), "import \"broken\"").unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::Syntax);
        assert_eq!(err.file, FileId(1));
    }

    #[test]
    fn test_self_import_hits_depth_limit() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("again.fun"), "import \"again\"").unwrap();
        let mut sources = SourceMap::new();
        let ast = parse_source("import \"again\"", FileId(0)).unwrap();
        let options = ResolveOptions { base_dir: dir.path().to_path_buf(), max_depth: 16, ..Default::default() };
        let err = resolve(ast, options, &mut sources).unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::TooDeep);
        assert!(sources.len() > 1);
    }

    #[test]
    fn test_module_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        let modules = dir.path().join("modules");
        fs::create_dir_all(modules.join("Counter")).unwrap();
        fs::create_dir_all(modules.join("Panel")).unwrap();
        fs::write(modules.join("Counter/lib.fun"), "let greeting = \"hi\"").unwrap();
        fs::write(modules.join("Counter/lib.js"), "fun.counter = {}").unwrap();
        fs::write(modules.join("Panel/lib.fun"), "import Counter").unwrap();

        let source = "import Counter\nimport Panel\nimport Counter\n<p>greeting</p>";
        let (res, sources) = resolve_in(dir.path(), source).unwrap();

        let names: Vec<_> = res.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Counter", "Panel"]);
        // main file plus each library once
        assert_eq!(sources.len(), 3);
        assert_eq!(res.modules[0].asset, RuntimeAsset::Script(modules.join("Counter/lib.js")));
        assert_eq!(res.modules[1].asset, RuntimeAsset::Placeholder("// No JS code for Panel".to_string()));
        assert!(res.modules[0].library.as_ref().is_some_and(|lib| lib.len() == 1));
        assert_eq!(literal(&xml_content(&res.ast[0])[0]), "hi");
    }

    #[test]
    fn test_missing_module() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_in(dir.path(), "import Location").unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::ModuleNotFound);
        assert!(err.message.contains("Location"));
    }

    #[test]
    fn test_depth_limit() {
        let mut sources = SourceMap::new();
        let ast = parse_source("<a><b><c><d/></c></b></a>", FileId(0)).unwrap();
        let options = ResolveOptions { max_depth: 3, ..Default::default() };
        let err = resolve(ast, options, &mut sources).unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::TooDeep);
    }

    #[test]
    fn test_each_nesting_level_counts_once() {
        let depth = 200;
        let source = format!("{}{}", "<a>".repeat(depth), "</a>".repeat(depth));
        let ast = parse_source(&source, FileId(0)).unwrap();

        let options = ResolveOptions { max_depth: depth, ..Default::default() };
        assert!(resolve(ast.clone(), options, &mut SourceMap::new()).is_ok());

        let options = ResolveOptions { max_depth: depth - 1, ..Default::default() };
        let err = resolve(ast, options, &mut SourceMap::new()).unwrap_err();
        assert_eq!(err.kind, ResolveErrorKind::TooDeep);
        assert!(err.message.contains("199"), "{}", err);
    }

    #[test]
    fn test_resolve_with_hands_over_result() {
        let mut sources = SourceMap::new();
        let ast = parse_source("let a = 1\na", FileId(0)).unwrap();
        let mut seen = None;
        resolve_with(ast, ResolveOptions::default(), &mut sources, |result| {
            seen = Some(result.map(|res| res.ast.len()));
        });
        assert_eq!(seen, Some(Ok(2)));
    }
}
