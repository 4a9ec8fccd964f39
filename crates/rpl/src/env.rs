// Environments: top-level bindings, loaded packages and import prefixes.
// Loading records definitions; compiling resolves references and produces
// a Program.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};

use crate::ast::{Binding, Exp, ImportDecl, Name, Statement};
use crate::parser::{parse_expression, parse_source};
use crate::program::{MAX_NODE_DEPTH, Node, Program};
use crate::violation::{Violation, Who};

#[derive(Debug, Clone)]
struct Entry {
    exp: Exp,
    alias: bool,
    local: bool,
}

#[derive(Debug, Clone, Default)]
struct Scope {
    bindings: AHashMap<String, Entry>,
    /// prefix -> package name
    imports: AHashMap<String, String>,
}

#[derive(Debug, Clone)]
struct Package {
    scope: Scope,
    origin: Option<String>,
}

/// Result of `load`, `load_package`: reported failures live in
/// `violations`, never in a Rust error.
#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    pub ok: bool,
    /// Package declared by the source, if any
    pub package: Option<String>,
    pub violations: Vec<Violation>,
    /// Packages the source imports; the caller must make sure they get
    /// loaded before patterns using them are compiled
    pub imports: Vec<ImportDecl>,
}

impl LoadOutcome {
    fn failed(violations: Vec<Violation>) -> Self {
        LoadOutcome {
            ok: false,
            violations,
            ..Default::default()
        }
    }
}

/// A successfully compiled expression.
#[derive(Debug)]
pub struct Compiled {
    pub program: Program,
    pub warnings: Vec<Violation>,
}

/// Statements of one source, grouped.
struct Unit {
    package: Option<String>,
    imports: Vec<ImportDecl>,
    bindings: Vec<Binding>,
}

impl Unit {
    fn collect(statements: Vec<Statement>) -> (Unit, Vec<Violation>) {
        let mut unit = Unit {
            package: None,
            imports: Vec::new(),
            bindings: Vec::new(),
        };
        let mut violations = Vec::new();
        let mut seen: AHashMap<String, usize> = AHashMap::new();
        for statement in statements {
            match statement {
                Statement::Package { name, .. } => unit.package = Some(name),
                Statement::Import { decls, .. } => unit.imports.extend(decls),
                Statement::Bind(binding) => {
                    if let Some(first) = seen.insert(binding.name.clone(), binding.pos) {
                        violations.push(
                            Violation::error(
                                Who::Loader,
                                format!(
                                    "'{}' is already defined (at position {})",
                                    binding.name, first
                                ),
                            )
                            .at(binding.pos)
                            .with_ast(binding.name.clone()),
                        );
                        continue;
                    }
                    unit.bindings.push(binding);
                }
            }
        }
        (unit, violations)
    }

    fn prefixes(&self) -> AHashSet<&str> {
        self.imports.iter().map(ImportDecl::prefix).collect()
    }

    fn into_scope(self) -> Scope {
        let mut scope = Scope::default();
        for decl in &self.imports {
            scope
                .imports
                .insert(decl.prefix().to_string(), decl.name.clone());
        }
        for b in self.bindings {
            scope.bindings.insert(
                b.name,
                Entry {
                    exp: b.exp,
                    alias: b.alias,
                    local: b.local,
                },
            );
        }
        scope
    }
}

/// Every reference in `exp` with its source position.
fn references<'x>(exp: &'x Exp, out: &mut Vec<(&'x Name, usize)>) {
    match exp {
        Exp::Ref { name, pos } => out.push((name, *pos)),
        Exp::Seq(items) | Exp::Choice(items) => items.iter().for_each(|e| references(e, out)),
        Exp::Repeat { exp, .. } | Exp::Predicate { exp, .. } => references(exp, out),
        Exp::Literal(_) | Exp::Set(_) | Exp::Any | Exp::Start | Exp::End => {}
    }
}

#[derive(Debug, Default)]
pub struct Environment {
    top: Scope,
    packages: AHashMap<String, Package>,
}

impl Environment {
    pub fn new() -> Self {
        Environment::default()
    }

    /// Load RPL source into the top-level environment. A source that
    /// declares a package is stored as that package and bound under its
    /// own name.
    pub fn load(&mut self, src: &str, origin: Option<&str>) -> LoadOutcome {
        let statements = match parse_source(src) {
            Ok(statements) => statements,
            Err(v) => return LoadOutcome::failed(vec![v.with_origin(origin)]),
        };
        let (unit, mut violations) = Unit::collect(statements);

        if let Some(name) = unit.package.clone() {
            violations.extend(self.check_unit(&unit, false));
            if violations.iter().any(Violation::is_error) {
                return LoadOutcome::failed(with_origin(violations, origin));
            }
            let imports = unit.imports.clone();
            self.insert_package(&name, unit, origin);
            self.top.imports.insert(name.clone(), name.clone());
            return LoadOutcome {
                ok: true,
                package: Some(name),
                violations: with_origin(violations, origin),
                imports,
            };
        }

        violations.extend(self.check_unit(&unit, true));
        if violations.iter().any(Violation::is_error) {
            return LoadOutcome::failed(with_origin(violations, origin));
        }
        let imports = unit.imports.clone();
        let scope = unit.into_scope();
        self.top.imports.extend(scope.imports);
        self.top.bindings.extend(scope.bindings);
        LoadOutcome {
            ok: true,
            package: None,
            violations: with_origin(violations, origin),
            imports,
        }
    }

    /// Load the source of package `expected` without binding it at top
    /// level (used by import).
    pub fn load_package(&mut self, expected: &str, src: &str, origin: Option<&str>) -> LoadOutcome {
        let statements = match parse_source(src) {
            Ok(statements) => statements,
            Err(v) => return LoadOutcome::failed(vec![v.with_origin(origin)]),
        };
        let (unit, mut violations) = Unit::collect(statements);
        match unit.package.as_deref() {
            Some(name) if name == expected => {}
            Some(name) => violations.push(Violation::error(
                Who::Importer,
                format!("source declares package '{}', expected '{}'", name, expected),
            )),
            None => violations.push(Violation::error(
                Who::Importer,
                format!("source for '{}' has no package declaration", expected),
            )),
        }
        violations.extend(self.check_unit(&unit, false));
        if violations.iter().any(Violation::is_error) {
            return LoadOutcome::failed(with_origin(violations, origin));
        }
        let imports = unit.imports.clone();
        self.insert_package(expected, unit, origin);
        LoadOutcome {
            ok: true,
            package: Some(expected.to_string()),
            violations: with_origin(violations, origin),
            imports,
        }
    }

    pub fn has_package(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Where a loaded package came from, when it was read from a file.
    pub fn package_origin(&self, name: &str) -> Option<&str> {
        self.packages.get(name).and_then(|p| p.origin.as_deref())
    }

    pub fn package_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.packages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Make a loaded package visible at top level as `alias` (or its name).
    pub fn bind(&mut self, package: &str, alias: Option<&str>) -> Result<(), Violation> {
        if !self.packages.contains_key(package) {
            return Err(Violation::error(
                Who::Importer,
                format!("package '{}' is not loaded", package),
            ));
        }
        let prefix = alias.unwrap_or(package);
        self.top
            .imports
            .insert(prefix.to_string(), package.to_string());
        Ok(())
    }

    /// Compile an expression against the top-level environment.
    pub fn compile(&self, expression: &str) -> Result<Compiled, Vec<Violation>> {
        let exp = parse_expression(expression).map_err(|v| vec![v])?;
        let mut expander = Expander {
            env: self,
            memo: AHashMap::new(),
            stack: Vec::new(),
            violations: Vec::new(),
            too_deep: false,
        };
        let (root, _) = expander.expand(&exp, None, 0);
        if expander.too_deep {
            expander.violations.push(
                Violation::error(
                    Who::Compiler,
                    format!("pattern nests more than {} levels deep", MAX_NODE_DEPTH),
                )
                .with_ast(expression),
            );
        }
        if !expander.violations.is_empty() {
            return Err(expander.violations);
        }

        let program = Program::new(root, expression);
        let mut warnings = Vec::new();
        if program.root.nullable() {
            warnings.push(
                Violation::warning(Who::Compiler, "pattern can match the empty string")
                    .with_ast(expression),
            );
        }
        Ok(Compiled { program, warnings })
    }

    fn insert_package(&mut self, name: &str, unit: Unit, origin: Option<&str>) {
        self.packages.insert(
            name.to_string(),
            Package {
                scope: unit.into_scope(),
                origin: origin.map(str::to_owned),
            },
        );
    }

    /// Check that unqualified names are defined and that qualified names
    /// use an imported prefix. Packages behind a prefix may not be loaded
    /// yet; that is checked at compile time.
    fn check_unit(&self, unit: &Unit, top_level: bool) -> Vec<Violation> {
        let defined: AHashSet<&str> = unit.bindings.iter().map(|b| b.name.as_str()).collect();
        let prefixes = unit.prefixes();
        let mut violations = Vec::new();
        for binding in &unit.bindings {
            let mut refs = Vec::new();
            references(&binding.exp, &mut refs);
            for (name, pos) in refs {
                let known = match &name.package {
                    None => {
                        defined.contains(name.local.as_str())
                            || (top_level && self.top.bindings.contains_key(&name.local))
                    }
                    Some(prefix) => {
                        prefixes.contains(prefix.as_str())
                            || (top_level && self.top.imports.contains_key(prefix))
                    }
                };
                if !known {
                    let message = match &name.package {
                        None => format!("undefined identifier: {}", name),
                        Some(prefix) => format!("no package imported as '{}' (in {})", prefix, name),
                    };
                    violations.push(
                        Violation::error(Who::Loader, message)
                            .at(pos)
                            .with_ast(binding.name.clone()),
                    );
                }
            }
        }
        violations
    }

    fn scope(&self, owner: Option<&str>) -> Option<&Scope> {
        match owner {
            None => Some(&self.top),
            Some(pkg) => self.packages.get(pkg).map(|p| &p.scope),
        }
    }

    /// Resolve `name` as seen from `owner` (None for top level).
    fn lookup<'a>(
        &'a self,
        name: &Name,
        owner: Option<&'a str>,
    ) -> Result<(Option<&'a str>, &'a Entry), String> {
        let scope = self
            .scope(owner)
            .ok_or_else(|| format!("package '{}' is not loaded", owner.unwrap_or("")))?;
        match &name.package {
            None => scope
                .bindings
                .get(&name.local)
                .map(|entry| (owner, entry))
                .ok_or_else(|| format!("undefined identifier: {}", name)),
            Some(prefix) => {
                let pkg = scope
                    .imports
                    .get(prefix)
                    .ok_or_else(|| format!("no package imported as '{}'", prefix))?;
                let package = self
                    .packages
                    .get(pkg)
                    .ok_or_else(|| format!("package '{}' is not loaded", pkg))?;
                let entry = package
                    .scope
                    .bindings
                    .get(&name.local)
                    .ok_or_else(|| format!("undefined identifier: {}", name))?;
                if entry.local {
                    return Err(format!("'{}' is local to package '{}'", name.local, pkg));
                }
                Ok((Some(pkg.as_str()), entry))
            }
        }
    }
}

fn with_origin(violations: Vec<Violation>, origin: Option<&str>) -> Vec<Violation> {
    violations
        .into_iter()
        .map(|v| v.with_origin(origin))
        .collect()
}

type BindingKey = (Option<String>, String);

/// Inlines references, sharing the body of each binding. Every expansion
/// returns the node with its height.
struct Expander<'e> {
    env: &'e Environment,
    memo: AHashMap<BindingKey, (Node, usize)>,
    stack: Vec<BindingKey>,
    violations: Vec<Violation>,
    /// Set once a node would sit deeper than `MAX_NODE_DEPTH`
    too_deep: bool,
}

impl<'e> Expander<'e> {
    fn expand(&mut self, exp: &Exp, owner: Option<&'e str>, depth: usize) -> (Node, usize) {
        if depth >= MAX_NODE_DEPTH || self.too_deep {
            self.too_deep = true;
            return (Node::Seq(Vec::new()), 0);
        }
        match exp {
            Exp::Literal(bytes) => (Node::Literal(bytes.clone().into_boxed_slice()), 1),
            Exp::Set(set) => (Node::Set(*set), 1),
            Exp::Any => (Node::Any, 1),
            Exp::Start => (Node::Start, 1),
            Exp::End => (Node::End, 1),
            Exp::Seq(items) => {
                let (items, height) = self.expand_all(items, owner, depth);
                (Node::Seq(items), height)
            }
            Exp::Choice(alts) => {
                let (alts, height) = self.expand_all(alts, owner, depth);
                (Node::Choice(alts), height)
            }
            Exp::Repeat { exp, min, max } => {
                let (node, height) = self.expand(exp, owner, depth + 1);
                let node = Node::Repeat {
                    node: Box::new(node),
                    min: *min,
                    max: *max,
                };
                (node, height + 1)
            }
            Exp::Predicate { exp, kind } => {
                let (node, height) = self.expand(exp, owner, depth + 1);
                let node = Node::Predicate {
                    node: Box::new(node),
                    kind: *kind,
                };
                (node, height + 1)
            }
            Exp::Ref { name, pos } => self.reference(name, *pos, owner, depth),
        }
    }

    fn expand_all(&mut self, exps: &[Exp], owner: Option<&'e str>, depth: usize) -> (Vec<Node>, usize) {
        let mut height = 0;
        let nodes = exps
            .iter()
            .map(|e| {
                let (node, h) = self.expand(e, owner, depth + 1);
                height = height.max(h);
                node
            })
            .collect();
        (nodes, height + 1)
    }

    fn reference(
        &mut self,
        name: &Name,
        pos: usize,
        owner: Option<&'e str>,
        depth: usize,
    ) -> (Node, usize) {
        let env = self.env;
        let (target, entry) = match env.lookup(name, owner) {
            Ok(found) => found,
            Err(message) => {
                self.violations.push(
                    Violation::error(Who::Compiler, message)
                        .at(pos)
                        .with_ast(name.to_string()),
                );
                return (Node::Seq(Vec::new()), 0);
            }
        };

        let key: BindingKey = (target.map(str::to_owned), name.local.clone());
        if let Some((node, height)) = self.memo.get(&key) {
            if depth + height > MAX_NODE_DEPTH {
                self.too_deep = true;
                return (Node::Seq(Vec::new()), 0);
            }
            return (node.clone(), *height);
        }
        if self.stack.contains(&key) {
            self.violations.push(
                Violation::error(
                    Who::Compiler,
                    format!("recursive definition of '{}' (grammars are not supported)", name),
                )
                .at(pos)
                .with_ast(name.to_string()),
            );
            return (Node::Seq(Vec::new()), 0);
        }

        self.stack.push(key.clone());
        let (body, height) = self.expand(&entry.exp, target, depth + 1);
        let body = Arc::new(body);
        self.stack.pop();

        let node = if entry.alias {
            Node::Alias(body)
        } else {
            let display = match target {
                Some(pkg) => format!("{}.{}", pkg, name.local),
                None => name.local.clone(),
            };
            Node::Capture {
                name: Arc::from(display),
                node: body,
            }
        };
        if !self.too_deep {
            self.memo.insert(key, (node.clone(), height + 1));
        }
        (node, height + 1)
    }
}
