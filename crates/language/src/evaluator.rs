//! AST evaluation into a catalog
//!
//! One [`Evaluator`] compiles one node. It owns the catalog under
//! construction, the classes and defined types known so far (hoisted from
//! the main manifests, autoloaded from the module path on demand) and the
//! scope of every class it has evaluated.

use crate::ast::{
    BinaryOp, Call, ChainOperand, Definition, DefinitionKind, Expr, ExprKind, NodeDef, NodeName,
    Param, Program, ResourceDecl, Statement, StatementKind, StringPart,
};
use crate::error::{Error, Result};
use crate::functions::{CallContext, FunctionRegistry};
use crate::loader::Loader;
use crate::scope::Scope;
use catalog::{
    Catalog, Location, METAPARAMS, Origin, Relationship, Resource, ResourceId, ResourceKind,
    ResourceRef, TypeRegistry, Value, normalize_name,
};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

pub struct Evaluator<'a> {
    types: &'a TypeRegistry,
    functions: &'a FunctionRegistry,
    loader: Loader<'a>,
    catalog: Catalog,
    classes: HashMap<String, Arc<Definition>>,
    defines: HashMap<String, Arc<Definition>>,
    nodes: Vec<Arc<NodeDef>>,
    autoloaded: HashSet<PathBuf>,
    /// Scope of every class evaluated so far
    evaluated: HashMap<String, Rc<Scope>>,
    top: Rc<Scope>,
    node_scope: Option<Rc<Scope>>,
    main_stage: ResourceId,
    /// File of the code currently being evaluated
    file: Option<String>,
    pending_realize: Vec<(ResourceRef, Location)>,
}

impl<'a> Evaluator<'a> {
    /// Start a catalog for `node` holding `Stage[main]` and `Class[main]`,
    /// with `facts` bound in the top scope
    pub fn new(
        node: &str,
        facts: &HashMap<String, String>,
        types: &'a TypeRegistry,
        functions: &'a FunctionRegistry,
        loader: Loader<'a>,
    ) -> Result<Self> {
        let environment = loader.environment().name.clone();
        let mut catalog = Catalog::new(node, &environment);
        let main_stage =
            catalog.add_resource(Resource::new("stage", "main").with_kind(ResourceKind::Stage))?;
        let main_class = catalog.add_contained(
            main_stage,
            Resource::new("class", "main").with_kind(ResourceKind::Class),
        )?;

        let top = Scope::top(main_class);
        let sorted: BTreeMap<&String, &String> = facts.iter().collect();
        let mut facts_hash = IndexMap::new();
        for (name, value) in sorted {
            top.set(name, Value::from(value.as_str()));
            facts_hash.insert(name.clone(), Value::from(value.as_str()));
        }
        top.set("facts", Value::Hash(facts_hash));
        top.set("environment", Value::from(environment));

        Ok(Self {
            types,
            functions,
            loader,
            catalog,
            classes: HashMap::new(),
            defines: HashMap::new(),
            nodes: Vec::new(),
            autoloaded: HashSet::new(),
            evaluated: HashMap::new(),
            top,
            node_scope: None,
            main_stage,
            file: None,
            pending_realize: Vec::new(),
        })
    }

    /// Hoist every definition, evaluate top-level code, then the matching
    /// node block
    pub fn evaluate_programs(&mut self, programs: &[Arc<Program>]) -> Result<()> {
        for program in programs {
            self.hoist(&program.statements, "")?;
        }
        let top = Rc::clone(&self.top);
        for program in programs {
            self.with_file(program.file.clone(), |ev| {
                ev.evaluate_block(&program.statements, &top)
            })?;
        }
        if let Some(node) = self.match_node()? {
            let scope = Scope::child(&top, "", top.container());
            self.node_scope = Some(Rc::clone(&scope));
            self.with_file(node.file.clone(), |ev| ev.evaluate_block(&node.body, &scope))?;
        }
        Ok(())
    }

    /// Apply deferred `realize` calls and hand over the catalog
    pub fn finish(mut self) -> Result<Catalog> {
        let pending = std::mem::take(&mut self.pending_realize);
        let mut missing = Vec::new();
        let mut first_location = None;
        for (reference, location) in pending {
            if self.catalog.id_of(&reference).is_some() {
                self.catalog.realize(&reference)?;
            } else {
                missing.push(reference.to_string());
                first_location.get_or_insert(location);
            }
        }
        if let Some(location) = first_location {
            return Err(Error::Evaluation {
                file: location.file,
                line: location.line.unwrap_or_default(),
                message: format!("Failed to realize virtual resources {}", missing.join(", ")),
            });
        }
        Ok(self.catalog)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn node_name(&self) -> &str {
        &self.catalog.name
    }

    /// An evaluation error at `line` of the current file
    pub fn error(&self, line: usize, message: impl Into<String>) -> Error {
        Error::evaluation(self.file.as_deref(), line, message)
    }

    /// `Class[Apache]`-style label of the resource a scope declares into
    pub fn scope_label(&self, scope: &Scope) -> String {
        self.catalog
            .get(scope.container())
            .map_or_else(|| "unknown".to_string(), |r| r.reference.to_string())
    }

    fn with_file<T>(
        &mut self,
        file: Option<String>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let previous = std::mem::replace(&mut self.file, file);
        let result = f(self);
        self.file = previous;
        result
    }

    fn hoist(&mut self, statements: &[Statement], namespace: &str) -> Result<()> {
        for statement in statements {
            match &statement.kind {
                StatementKind::Definition(definition) => {
                    let name = qualify(namespace, &definition.name);
                    let definition = if name == definition.name {
                        Arc::clone(definition)
                    } else {
                        Arc::new(Definition {
                            name: name.clone(),
                            ..Definition::clone(definition)
                        })
                    };
                    let known = match definition.kind {
                        DefinitionKind::Class => &mut self.classes,
                        DefinitionKind::Define | DefinitionKind::Application => &mut self.defines,
                    };
                    if known.contains_key(&name) {
                        return Err(Error::evaluation(
                            definition.file.as_deref(),
                            definition.line,
                            format!(
                                "Duplicate definition: {} {} is already defined",
                                definition.kind.as_str(),
                                name
                            ),
                        ));
                    }
                    known.insert(name.clone(), Arc::clone(&definition));
                    if definition.kind == DefinitionKind::Class {
                        self.hoist(&definition.body, &name)?;
                    }
                }
                StatementKind::Node(node) if namespace.is_empty() => {
                    self.nodes.push(Arc::clone(node));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn find_class(&mut self, name: &str) -> Result<Option<Arc<Definition>>> {
        if !self.classes.contains_key(name) {
            self.autoload(name)?;
        }
        Ok(self.classes.get(name).cloned())
    }

    fn find_define(&mut self, name: &str) -> Result<Option<Arc<Definition>>> {
        if !self.defines.contains_key(name) {
            self.autoload(name)?;
        }
        Ok(self.defines.get(name).cloned())
    }

    fn autoload(&mut self, name: &str) -> Result<()> {
        let Some(path) = self.loader.module_file(name) else {
            return Ok(());
        };
        if !self.autoloaded.insert(path.clone()) {
            return Ok(());
        }
        log::debug!("Autoloading {} from {}", name, path.display());
        let program = self.loader.load(&path)?;
        self.hoist(&program.statements, "")
    }

    fn match_node(&self) -> Result<Option<Arc<NodeDef>>> {
        let Some(first) = self.nodes.first() else {
            return Ok(None);
        };
        let node = self.catalog.name.to_lowercase();
        let mut candidates = vec![node.clone()];
        let mut rest = node.as_str();
        while let Some((head, _)) = rest.rsplit_once('.') {
            candidates.push(head.to_string());
            rest = head;
        }
        for candidate in &candidates {
            let found = self.nodes.iter().find(|node| {
                node.names.iter().any(
                    |name| matches!(name, NodeName::Name(value) if value.eq_ignore_ascii_case(candidate)),
                )
            });
            if let Some(found) = found {
                return Ok(Some(Arc::clone(found)));
            }
        }
        if let Some(default) = self
            .nodes
            .iter()
            .find(|n| n.names.contains(&NodeName::Default))
        {
            return Ok(Some(Arc::clone(default)));
        }
        Err(Error::evaluation(
            first.file.as_deref(),
            first.line,
            format!(
                "Could not find node statement with name 'default' or '{}'",
                self.catalog.name
            ),
        ))
    }

    fn evaluate_block(&mut self, statements: &[Statement], scope: &Rc<Scope>) -> Result<()> {
        for statement in statements {
            self.evaluate_statement(statement, scope)?;
        }
        Ok(())
    }

    fn evaluate_statement(&mut self, statement: &Statement, scope: &Rc<Scope>) -> Result<()> {
        let line = statement.line;
        match &statement.kind {
            StatementKind::Definition(_) | StatementKind::Node(_) => Ok(()),
            StatementKind::Resource(decl) => self.declare(decl, scope).map(drop),
            StatementKind::Defaults { type_name, params } => {
                let values = self.evaluate_params(params, scope)?;
                scope.set_defaults(type_name, values);
                Ok(())
            }
            StatementKind::Site(body) => {
                let site = Resource::new("site", "site")
                    .with_kind(ResourceKind::Site)
                    .with_location(self.file.clone(), line);
                let id = self.catalog.add_contained(scope.container(), site)?;
                let site_scope = Scope::child(scope, "", id);
                self.evaluate_block(body, &site_scope)
            }
            StatementKind::Call(call) => self
                .call(call, scope, line, CallContext::Statement)
                .map(drop),
            StatementKind::Assign { name, value } => {
                if name.contains("::") {
                    return Err(self.error(
                        line,
                        format!(
                            "Illegal attempt to assign to '${name}'. Cannot assign to variables in other namespaces"
                        ),
                    ));
                }
                let value = self.evaluate(value, scope)?;
                if !scope.set(name, value) {
                    return Err(self.error(line, format!("Cannot reassign variable '${name}'")));
                }
                Ok(())
            }
            StatementKind::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.evaluate(condition, scope)?.is_truthy() {
                        return self.evaluate_block(body, scope);
                    }
                }
                self.evaluate_block(otherwise, scope)
            }
            StatementKind::Case { subject, arms } => {
                let value = self.evaluate(subject, scope)?;
                let mut fallback = None;
                for arm in arms {
                    for candidate in &arm.matches {
                        if matches!(candidate.kind, ExprKind::Default) {
                            fallback.get_or_insert(arm);
                            continue;
                        }
                        let candidate = self.evaluate(candidate, scope)?;
                        if case_matches(&value, &candidate) {
                            return self.evaluate_block(&arm.body, scope);
                        }
                    }
                }
                match fallback {
                    Some(arm) => self.evaluate_block(&arm.body, scope),
                    None => Ok(()),
                }
            }
            StatementKind::Chain { operands, arrows } => {
                let mut sides = Vec::with_capacity(operands.len());
                for operand in operands {
                    sides.push(self.chain_operand(operand, scope, line)?);
                }
                for (i, arrow) in arrows.iter().enumerate() {
                    for left in &sides[i] {
                        for right in &sides[i + 1] {
                            let (source, target) = if arrow.right2left {
                                (right.clone(), left.clone())
                            } else {
                                (left.clone(), right.clone())
                            };
                            self.catalog.add_relationship(Relationship {
                                source,
                                target,
                                notification: arrow.notification,
                                right2left: arrow.right2left,
                            })?;
                        }
                    }
                }
                Ok(())
            }
            StatementKind::Expression(expr) => self.evaluate(expr, scope).map(drop),
        }
    }

    fn chain_operand(
        &mut self,
        operand: &ChainOperand,
        scope: &Rc<Scope>,
        line: usize,
    ) -> Result<Vec<ResourceRef>> {
        match operand {
            ChainOperand::Resource(decl) => self.declare(decl, scope),
            ChainOperand::Expr(expr) => {
                let value = self.evaluate(expr, scope)?;
                relationship_operand(&value).ok_or_else(|| {
                    self.error(
                        line,
                        format!(
                            "Illegal relationship operand, can not form a relationship with a {}. A Catalog type is required.",
                            value.kind()
                        ),
                    )
                })
            }
        }
    }

    fn evaluate_params(&mut self, params: &[Param], scope: &Rc<Scope>) -> Result<IndexMap<String, Value>> {
        let mut values = IndexMap::new();
        for param in params {
            let value = self.evaluate(&param.value, scope)?;
            if values.insert(param.name.clone(), value).is_some() {
                return Err(self.error(
                    param.line,
                    format!("The parameter '{}' is declared more than once", param.name),
                ));
            }
        }
        Ok(values)
    }

    /// Declare every body of a resource statement
    fn declare(&mut self, decl: &ResourceDecl, scope: &Rc<Scope>) -> Result<Vec<ResourceRef>> {
        let mut references = Vec::new();
        for body in &decl.bodies {
            let titles = match self.evaluate(&body.title, scope)? {
                Value::Undef => return Err(self.error(body.line, "Missing title")),
                array @ Value::Array(_) => array.to_string_list(),
                other => vec![other.to_string()],
            };
            let params = self.evaluate_params(&body.params, scope)?;
            for title in titles {
                let reference = if decl.type_name == "class" {
                    self.declare_class(&title, Some(params.clone()), scope, body.line)?
                } else {
                    self.declare_resource(
                        &decl.type_name,
                        &title,
                        params.clone(),
                        decl.origin,
                        scope,
                        body.line,
                    )?
                };
                references.push(reference);
            }
        }
        Ok(references)
    }

    fn declare_resource(
        &mut self,
        type_name: &str,
        title: &str,
        params: IndexMap<String, Value>,
        origin: Origin,
        scope: &Rc<Scope>,
        line: usize,
    ) -> Result<ResourceRef> {
        let location = Location::new(self.file.clone(), line);
        let mut resource = Resource::new(type_name, title);
        resource.location = location.clone();
        resource.origin = origin;
        for (name, value) in params {
            resource.set(&name, value);
        }
        for (name, value) in scope.defaults_for(type_name) {
            if !resource.parameters.contains_key(&name) {
                resource.set(&name, value);
            }
        }
        self.inherit_tags(&mut resource, scope.container());
        if let Some(tags) = resource.get("tag").map(Value::to_string_list) {
            for tag in tags {
                resource.tag(tag);
            }
        }
        let reference = resource.reference.clone();

        if type_name == "stage" {
            resource.kind = ResourceKind::Stage;
            check_parameters(&[], &resource)?;
            self.catalog.add_resource(resource)?;
            return Ok(reference);
        }

        if self.types.contains(type_name) {
            self.types.validate_parameters(&resource)?;
            self.catalog.add_contained(scope.container(), resource)?;
            return Ok(reference);
        }

        let Some(definition) = self.find_define(type_name)? else {
            return Err(catalog::Error::UnknownResourceType {
                type_name: type_name.to_string(),
                location,
            }
            .into());
        };
        resource.kind = match definition.kind {
            DefinitionKind::Application => ResourceKind::Application,
            _ => ResourceKind::Defined,
        };
        resource.tag(type_name);
        resource.component = self.inside_application(scope.container());
        check_parameters(&definition.params, &resource)?;

        let before = self.catalog.len();
        let id = self.catalog.add_contained(scope.container(), resource)?;
        if self.catalog.len() == before || origin != Origin::Here {
            return Ok(reference);
        }
        let provided = self
            .catalog
            .get(id)
            .map(|r| r.parameters.clone())
            .unwrap_or_default();
        self.evaluate_instance(&definition, id, &reference, provided, &location)?;
        Ok(reference)
    }

    /// Evaluate the body of a defined type instance
    fn evaluate_instance(
        &mut self,
        definition: &Arc<Definition>,
        id: ResourceId,
        reference: &ResourceRef,
        mut provided: IndexMap<String, Value>,
        declared_at: &Location,
    ) -> Result<()> {
        let parent = self.node_scope.clone().unwrap_or_else(|| Rc::clone(&self.top));
        let scope = Scope::child(&parent, "", id);
        let title = Value::from(reference.title.as_str());
        scope.set("title", title.clone());
        if definition.param("name").is_some() {
            provided.entry("name".to_string()).or_insert(title);
        } else {
            scope.set("name", title);
        }
        log::debug!("Evaluating {reference}");
        self.with_file(definition.file.clone(), |ev| {
            ev.bind_parameters(definition, &scope, &provided, reference, declared_at)?;
            ev.evaluate_block(&definition.body, &scope)
        })
    }

    /// Declare a class, evaluating it the first time it is seen
    ///
    /// `params` is `Some` for resource-like declarations, which may only
    /// happen once per class and never after an `include`.
    pub fn declare_class(
        &mut self,
        name: &str,
        params: Option<IndexMap<String, Value>>,
        scope: &Rc<Scope>,
        line: usize,
    ) -> Result<ResourceRef> {
        let name = normalize_name(name);
        let reference = ResourceRef::class(&name);
        let location = Location::new(self.file.clone(), line);
        if self.evaluated.contains_key(&name) {
            if params.is_some() {
                let first = self
                    .catalog
                    .resource(&reference)
                    .map(|r| r.location.clone())
                    .unwrap_or_default();
                return Err(catalog::Error::DuplicateResource {
                    reference: reference.to_string(),
                    first,
                    second: location,
                }
                .into());
            }
            return Ok(reference);
        }

        let Some(definition) = self.find_class(&name)? else {
            return Err(self.error(
                line,
                format!("Could not find class {} for {}", name, self.catalog.name),
            ));
        };
        let params = params.unwrap_or_default();
        let mut resource = Resource::new("class", &name).with_kind(ResourceKind::Class);
        resource.location = location.clone();
        resource.tag(&name);
        for (param, value) in &params {
            resource.set(param, value.clone());
        }
        check_parameters(&definition.params, &resource)?;

        let parent_scope = match &definition.parent {
            Some(parent) => {
                self.declare_class(parent, None, scope, line)?;
                self.evaluated
                    .get(&normalize_name(parent))
                    .cloned()
                    .unwrap_or_else(|| Rc::clone(&self.top))
            }
            None => self.node_scope.clone().unwrap_or_else(|| Rc::clone(&self.top)),
        };
        let container = match params.get("stage").filter(|v| !v.is_undef()) {
            Some(stage) => {
                let stage_ref = ResourceRef::new("stage", stage.to_string());
                self.catalog.id_of(&stage_ref).ok_or_else(|| {
                    self.error(
                        line,
                        format!("Could not find stage {stage} specified by {reference}"),
                    )
                })?
            }
            None => self.main_stage,
        };

        let id = self.catalog.add_contained(container, resource)?;
        self.catalog.classes.push(name.clone());
        let class_scope = Scope::child(&parent_scope, &name, id);
        self.evaluated.insert(name.clone(), Rc::clone(&class_scope));
        if definition.param("title").is_none() {
            class_scope.set("title", Value::from(name.as_str()));
        }
        if definition.param("name").is_none() {
            class_scope.set("name", Value::from(name.as_str()));
        }

        log::debug!("Evaluating {reference}");
        self.with_file(definition.file.clone(), |ev| {
            ev.bind_parameters(&definition, &class_scope, &params, &reference, &location)?;
            ev.evaluate_block(&definition.body, &class_scope)
        })?;
        Ok(reference)
    }

    /// `require`: declare the class and order it before the caller
    pub fn require_class(&mut self, name: &str, scope: &Rc<Scope>, line: usize) -> Result<()> {
        let reference = self.declare_class(name, None, scope, line)?;
        if let Some(container) = self.catalog.get(scope.container()).map(|r| r.reference.clone()) {
            self.catalog.add_relationship(Relationship {
                source: reference,
                target: container,
                notification: false,
                right2left: false,
            })?;
        }
        Ok(())
    }

    /// `contain`: declare the class and move it inside the caller
    pub fn contain_class(&mut self, name: &str, scope: &Rc<Scope>, line: usize) -> Result<()> {
        let reference = self.declare_class(name, None, scope, line)?;
        if let Some(id) = self.catalog.id_of(&reference)
            && id != scope.container()
        {
            self.catalog.contain(scope.container(), id)?;
        }
        Ok(())
    }

    /// Queue a virtual resource for realization once evaluation is done
    pub fn realize(&mut self, reference: ResourceRef, line: usize) {
        let location = Location::new(self.file.clone(), line);
        self.pending_realize.push((reference, location));
    }

    pub fn tag_container(&mut self, scope: &Scope, tags: &[String]) {
        if let Some(container) = self.catalog.get_mut(scope.container()) {
            for tag in tags {
                container.tag(tag);
            }
        }
    }

    pub fn container_tagged(&self, scope: &Scope, tag: &str) -> bool {
        self.catalog
            .get(scope.container())
            .is_some_and(|r| r.tagged(tag))
    }

    /// `defined()`: variables (`'$x'`), types, classes, defined types and
    /// declared resources
    pub fn is_defined(&mut self, value: &Value, scope: &Rc<Scope>) -> Result<bool> {
        match value {
            Value::String(s) => {
                if let Some(variable) = s.strip_prefix('$') {
                    return Ok(self.lookup_variable(variable, scope, 0).is_ok());
                }
                let name = normalize_name(s);
                Ok(self.types.contains(&name)
                    || name == "stage"
                    || self.find_class(&name)?.is_some()
                    || self.find_define(&name)?.is_some())
            }
            Value::Ref(reference) if reference.is_class() => {
                Ok(self.evaluated.contains_key(&reference.title))
            }
            Value::Ref(reference) => Ok(self.catalog.id_of(reference).is_some()),
            _ => Ok(false),
        }
    }

    fn inherit_tags(&self, resource: &mut Resource, container: ResourceId) {
        if let Some(parent) = self.catalog.get(container)
            && parent.kind != ResourceKind::Stage
        {
            resource.tags.extend(parent.tags.iter().cloned());
        }
    }

    fn inside_application(&self, container: ResourceId) -> bool {
        std::iter::once(container)
            .chain(self.catalog.ancestors(container))
            .any(|id| {
                self.catalog
                    .get(id)
                    .is_some_and(|r| r.kind == ResourceKind::Application)
            })
    }

    /// Bind declared parameters in a class or define scope
    ///
    /// Defaults are evaluated after every passed value is bound and may
    /// refer to other parameters, in any order.
    fn bind_parameters(
        &mut self,
        definition: &Definition,
        scope: &Rc<Scope>,
        provided: &IndexMap<String, Value>,
        reference: &ResourceRef,
        declared_at: &Location,
    ) -> Result<()> {
        let mut pending = Vec::new();
        for param in &definition.params {
            match (provided.get(&param.name), &param.default) {
                (Some(value), None) => {
                    scope.set(&param.name, value.clone());
                }
                (Some(value), Some(_)) if !value.is_undef() => {
                    scope.set(&param.name, value.clone());
                }
                (_, Some(default)) => pending.push((param.name.as_str(), default)),
                (None, None) => {
                    return Err(Error::Evaluation {
                        file: declared_at.file.clone(),
                        line: declared_at.line.unwrap_or_default(),
                        message: format!(
                            "{reference}: expects a value for parameter '{}'",
                            param.name
                        ),
                    });
                }
            }
        }

        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            let mut last_error = None;
            for (name, default) in pending {
                match self.evaluate(default, scope) {
                    Ok(value) => {
                        scope.set(name, value);
                    }
                    Err(Error::UnknownVariable {
                        name: missing,
                        file,
                        line,
                    }) if definition.param(&missing).is_some()
                        && scope.get_local(&missing).is_none() =>
                    {
                        last_error = Some(Error::UnknownVariable {
                            name: missing,
                            file,
                            line,
                        });
                        deferred.push((name, default));
                    }
                    Err(e) => return Err(e),
                }
            }
            if let Some(error) = last_error
                && deferred.len() == before
            {
                return Err(error);
            }
            pending = deferred;
        }
        Ok(())
    }

    fn lookup_variable(&self, name: &str, scope: &Scope, line: usize) -> Result<Value> {
        let found = if let Some(top_name) = name.strip_prefix("::") {
            self.top.get_local(top_name)
        } else if let Some((class, variable)) = name.rsplit_once("::") {
            let Some(class_scope) = self.evaluated.get(&normalize_name(class)) else {
                return Err(self.error(
                    line,
                    format!(
                        "Could not look up qualified variable '${name}'; class {class} has not been evaluated"
                    ),
                ));
            };
            class_scope.get_local(variable)
        } else {
            scope.lookup(name)
        };
        found.ok_or_else(|| Error::UnknownVariable {
            name: name.to_string(),
            file: self.file.clone(),
            line,
        })
    }

    fn call(
        &mut self,
        call: &Call,
        scope: &Rc<Scope>,
        line: usize,
        context: CallContext,
    ) -> Result<Value> {
        let registry = self.functions;
        let Some(function) = registry.get(&call.name) else {
            return Err(Error::UnknownFunction {
                name: call.name.clone(),
                file: self.file.clone(),
                line,
            });
        };
        if let Err(message) = function.check_context(context) {
            return Err(Error::FunctionContext {
                name: call.name.clone(),
                message,
                file: self.file.clone(),
                line,
            });
        }
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(self.evaluate(arg, scope)?);
        }
        (function.implementation)(self, scope, args, line)
    }

    pub fn evaluate(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value> {
        let line = expr.line;
        let value = match &expr.kind {
            ExprKind::Undef => Value::Undef,
            ExprKind::Default => Value::from("default"),
            ExprKind::Bool(b) => Value::Bool(*b),
            ExprKind::Integer(i) => Value::Integer(*i),
            ExprKind::Float(x) => Value::Float(*x),
            ExprKind::Str(s) => Value::from(s.as_str()),
            ExprKind::Interpolated(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        StringPart::Literal(text) => out.push_str(text),
                        StringPart::Expr(expr) => out.push_str(&self.evaluate(expr, scope)?.to_string()),
                    }
                }
                Value::String(out)
            }
            ExprKind::Variable(name) => self.lookup_variable(name, scope, line)?,
            ExprKind::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.evaluate(item, scope)?);
                }
                Value::Array(values)
            }
            ExprKind::Hash(entries) => {
                let mut map = IndexMap::new();
                for (key, value) in entries {
                    let key = self.evaluate(key, scope)?.to_string();
                    let value = self.evaluate(value, scope)?;
                    map.insert(key, value);
                }
                Value::Hash(map)
            }
            ExprKind::TypeName(name) => Value::from(name.as_str()),
            ExprKind::Reference { type_name, titles } => {
                let mut references = Vec::new();
                for title in titles {
                    for title in self.evaluate(title, scope)?.to_string_list() {
                        references.push(Value::Ref(ResourceRef::new(type_name, title)));
                    }
                }
                if references.len() == 1 {
                    references.remove(0)
                } else {
                    Value::Array(references)
                }
            }
            ExprKind::Index { target, index } => {
                let target = self.evaluate(target, scope)?;
                let index = self.evaluate(index, scope)?;
                self.index(target, &index, line)?
            }
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => Value::Bool(
                    self.evaluate(lhs, scope)?.is_truthy() && self.evaluate(rhs, scope)?.is_truthy(),
                ),
                BinaryOp::Or => Value::Bool(
                    self.evaluate(lhs, scope)?.is_truthy() || self.evaluate(rhs, scope)?.is_truthy(),
                ),
                _ => {
                    let left = self.evaluate(lhs, scope)?;
                    let right = self.evaluate(rhs, scope)?;
                    self.binary(*op, left, right, line)?
                }
            },
            ExprKind::Not(operand) => Value::Bool(!self.evaluate(operand, scope)?.is_truthy()),
            ExprKind::Negate(operand) => match number(&self.evaluate(operand, scope)?) {
                Some(Number::Int(i)) => Value::Integer(
                    i.checked_neg().ok_or_else(|| self.error(line, "Integer overflow"))?,
                ),
                Some(Number::Float(x)) => Value::Float(-x),
                None => return Err(self.error(line, "Operator '-' is only applicable to numbers")),
            },
            ExprKind::Selector { subject, cases } => {
                let value = self.evaluate(subject, scope)?;
                let mut fallback = None;
                for (key, result) in cases {
                    if matches!(key.kind, ExprKind::Default) {
                        fallback.get_or_insert(result);
                        continue;
                    }
                    let key = self.evaluate(key, scope)?;
                    if case_matches(&value, &key) {
                        return self.evaluate(result, scope);
                    }
                }
                match fallback {
                    Some(result) => self.evaluate(result, scope)?,
                    None => {
                        return Err(self.error(
                            line,
                            format!("No matching value for selector param '{value}'"),
                        ));
                    }
                }
            }
            ExprKind::Call(call) => self.call(call, scope, line, CallContext::Rvalue)?,
        };
        Ok(value)
    }

    fn index(&self, target: Value, index: &Value, line: usize) -> Result<Value> {
        match target {
            Value::Array(items) => {
                let Some(i) = index.as_integer() else {
                    return Err(self.error(line, format!("Array index must be an Integer, got {}", index.kind())));
                };
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                let position = if i < 0 { len + i } else { i };
                Ok(usize::try_from(position)
                    .ok()
                    .and_then(|p| items.get(p).cloned())
                    .unwrap_or_default())
            }
            Value::Hash(map) => Ok(map.get(&index.to_string()).cloned().unwrap_or_default()),
            Value::String(s) => {
                let Some(i) = index.as_integer().and_then(|i| usize::try_from(i).ok()) else {
                    return Err(self.error(line, "String index must be a non-negative Integer"));
                };
                Ok(s.chars()
                    .nth(i)
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or_default())
            }
            other => Err(self.error(
                line,
                format!("Operator '[]' is not applicable to an {} value", other.kind()),
            )),
        }
    }

    fn binary(&self, op: BinaryOp, left: Value, right: Value, line: usize) -> Result<Value> {
        let not_applicable = || {
            self.error(
                line,
                format!(
                    "Operator '{}' is not applicable to {} and {}",
                    op.symbol(),
                    left.kind(),
                    right.kind()
                ),
            )
        };
        match op {
            BinaryOp::Eq => return Ok(Value::Bool(values_equal(&left, &right))),
            BinaryOp::Ne => return Ok(Value::Bool(!values_equal(&left, &right))),
            BinaryOp::In => return Ok(Value::Bool(contains(&right, &left))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = compare(&left, &right).ok_or_else(|| {
                    self.error(
                        line,
                        format!(
                            "Comparison of: {} {} {}, is not possible",
                            left.kind(),
                            op.symbol(),
                            right.kind()
                        ),
                    )
                })?;
                let result = match op {
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::Le => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                };
                return Ok(Value::Bool(result));
            }
            _ => {}
        }

        match (op, &left, &right) {
            (BinaryOp::Add, Value::Array(a), Value::Array(b)) => {
                return Ok(Value::Array(a.iter().chain(b).cloned().collect()));
            }
            (BinaryOp::Add, Value::Array(a), other) => {
                let mut items = a.clone();
                items.push(other.clone());
                return Ok(Value::Array(items));
            }
            (BinaryOp::Sub, Value::Array(a), Value::Array(b)) => {
                return Ok(Value::Array(
                    a.iter()
                        .filter(|item| !b.iter().any(|x| values_equal(item, x)))
                        .cloned()
                        .collect(),
                ));
            }
            (BinaryOp::Add, Value::Hash(a), Value::Hash(b)) => {
                let mut merged = a.clone();
                merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
                return Ok(Value::Hash(merged));
            }
            _ => {}
        }

        let (Some(a), Some(b)) = (number(&left), number(&right)) else {
            return Err(not_applicable());
        };
        match (a, b) {
            (Number::Int(a), Number::Int(b)) => {
                let result = match op {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Sub => a.checked_sub(b),
                    BinaryOp::Mul => a.checked_mul(b),
                    BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                        return Err(self.error(line, "Division by 0"));
                    }
                    BinaryOp::Div => a.checked_div(b),
                    BinaryOp::Mod => a.checked_rem(b),
                    _ => return Err(not_applicable()),
                };
                result
                    .map(Value::Integer)
                    .ok_or_else(|| self.error(line, "Integer overflow"))
            }
            (a, b) => {
                let (a, b) = (a.as_f64(), b.as_f64());
                let result = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div if b == 0.0 => return Err(self.error(line, "Division by 0")),
                    BinaryOp::Div => a / b,
                    _ => return Err(not_applicable()),
                };
                Ok(Value::Float(result))
            }
        }
    }
}

/// `a::b` inside class `ns` is `ns::a::b` unless already qualified by it
fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() || name.starts_with(&format!("{namespace}::")) {
        name.to_string()
    } else {
        format!("{namespace}::{name}")
    }
}

/// Reject parameters neither declared nor metaparameters
fn check_parameters(declared: &[crate::ast::ParamDecl], resource: &Resource) -> Result<()> {
    for name in resource.parameters.keys() {
        if METAPARAMS.contains(&name.as_str()) || declared.iter().any(|p| &p.name == name) {
            continue;
        }
        return Err(catalog::Error::InvalidParameter {
            reference: resource.reference.to_string(),
            parameter: name.clone(),
            location: resource.location.clone(),
        }
        .into());
    }
    Ok(())
}

fn relationship_operand(value: &Value) -> Option<Vec<ResourceRef>> {
    match value {
        Value::Ref(reference) => Some(vec![reference.clone()]),
        Value::Array(items) => {
            let mut references = Vec::new();
            for item in items {
                references.extend(relationship_operand(item)?);
            }
            Some(references)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(x) => x,
        }
    }
}

/// Numbers and numeric strings
fn number(value: &Value) -> Option<Number> {
    match value {
        Value::Integer(i) => Some(Number::Int(*i)),
        Value::Float(x) => Some(Number::Float(*x)),
        Value::String(s) => {
            let s = s.trim();
            s.parse()
                .map(Number::Int)
                .ok()
                .or_else(|| s.parse().map(Number::Float).ok())
        }
        _ => None,
    }
}

/// `==`: strings compare case-insensitively, integers equal floats of the
/// same value
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.to_lowercase() == y.to_lowercase(),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            compare(a, b) == Some(Ordering::Equal)
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Hash(x), Value::Hash(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

/// Case and selector matching: equality, or membership when the option
/// is an array and the subject is not
fn case_matches(subject: &Value, option: &Value) -> bool {
    values_equal(subject, option)
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.to_lowercase().cmp(&y.to_lowercase())),
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            let (x, y) = (number(a)?.as_f64(), number(b)?.as_f64());
            x.partial_cmp(&y)
        }
        _ => None,
    }
}

/// `needle in haystack`
fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(text) => text
            .to_lowercase()
            .contains(&needle.to_string().to_lowercase()),
        Value::Array(items) => items.iter().any(|item| values_equal(needle, item)),
        Value::Hash(map) => map
            .keys()
            .any(|key| values_equal(needle, &Value::String(key.clone()))),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{Environment, ManifestCache};
    use crate::parser::parse_str;
    use catalog::ResourceType;

    fn types() -> TypeRegistry {
        let mut types = TypeRegistry::new();
        types.register(ResourceType::builtin("notify").namevar("name").property("message"));
        types.register(
            ResourceType::builtin("file")
                .namevar("path")
                .property("ensure")
                .property("content")
                .property("mode"),
        );
        types.register(ResourceType::capability("sql").parameter("host"));
        types
    }

    fn evaluate_with(code: &str, facts: &[(&str, &str)]) -> Result<Catalog> {
        let types = types();
        let functions = FunctionRegistry::builtin();
        let env = Environment::new("production");
        let cache = ManifestCache::new();
        let loader = Loader::new(&env, &cache);
        let facts: HashMap<String, String> = facts
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut evaluator = Evaluator::new("web1.example.com", &facts, &types, &functions, loader)?;
        let program = Arc::new(parse_str(code, Some("site.pp"))?);
        evaluator.evaluate_programs(&[program])?;
        evaluator.finish()
    }

    fn evaluate(code: &str) -> Result<Catalog> {
        evaluate_with(code, &[])
    }

    fn notify_titles(catalog: &Catalog) -> Vec<String> {
        catalog
            .resources()
            .filter(|(_, r)| r.type_name() == "notify")
            .map(|(_, r)| r.title().to_string())
            .collect()
    }

    #[test]
    fn test_parameterized_class_with_default() {
        let catalog =
            evaluate("class x($y,$z='2'){ notify{\"${y}-${z}\":} } class{x: y=>'1'}").unwrap();
        assert_eq!(notify_titles(&catalog), vec!["1-2"]);
    }

    #[test]
    fn test_defaults_may_reference_other_parameters() {
        let catalog = evaluate(
            "class app($path = \"${root}/app\", $root = '/srv') { notify { $path: } }\ninclude app",
        )
        .unwrap();
        assert_eq!(notify_titles(&catalog), vec!["/srv/app"]);
    }

    #[test]
    fn test_missing_class_parameter() {
        let err = evaluate("class x($y) { }\nclass { 'x': }").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Evaluation Error: Class[X]: expects a value for parameter 'y' (file: site.pp, line: 2)"
        );
    }

    #[test]
    fn test_unknown_class_parameter() {
        let err = evaluate("class x { }\nclass { 'x': bogus => 1 }").unwrap_err();
        assert!(err.to_string().contains("Invalid parameter 'bogus' on Class[X]"));
    }

    #[test]
    fn test_classes_evaluate_once() {
        let catalog =
            evaluate("class base { notify { 'once': } }\ninclude base\ninclude base\ninclude ::base")
                .unwrap();
        assert_eq!(notify_titles(&catalog), vec!["once"]);
        assert_eq!(catalog.classes, vec!["base"]);
    }

    #[test]
    fn test_resource_like_after_include_is_duplicate() {
        let err = evaluate("class base { }\ninclude base\nclass { 'base': }").unwrap_err();
        assert!(
            err.to_string()
                .starts_with("Duplicate declaration: Class[Base] is already declared")
        );
    }

    #[test]
    fn test_inheritance_falls_through_to_parent_scope() {
        let catalog = evaluate(
            "class params { $port = 8080 }\nclass web inherits params { notify { \"port ${port}\": } }\ninclude web",
        )
        .unwrap();
        assert_eq!(notify_titles(&catalog), vec!["port 8080"]);
        assert_eq!(catalog.classes, vec!["params", "web"]);
    }

    #[test]
    fn test_qualified_variable_lookup() {
        let catalog = evaluate(
            "class conf { $dir = '/etc/app' }\ninclude conf\nnotify { $conf::dir: }\nnotify { \"top ${::environment}\": }",
        )
        .unwrap();
        assert_eq!(notify_titles(&catalog), vec!["/etc/app", "top production"]);
    }

    #[test]
    fn test_unknown_variable() {
        let err = evaluate("notify { $nope: }").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Evaluation Error: Unknown variable: 'nope' (file: site.pp, line: 1)"
        );
    }

    #[test]
    fn test_variables_cannot_be_reassigned() {
        let err = evaluate("$a = 1\n$a = 2").unwrap_err();
        assert!(err.to_string().contains("Cannot reassign variable '$a'"));
    }

    #[test]
    fn test_facts_are_top_scope_variables() {
        let catalog = evaluate_with(
            "notify { \"${osfamily} ${facts['kernel']}\": }",
            &[("osfamily", "Debian"), ("kernel", "Linux")],
        )
        .unwrap();
        assert_eq!(notify_titles(&catalog), vec!["Debian Linux"]);
    }

    #[test]
    fn test_defined_type_instances() {
        let catalog = evaluate(
            "define vhost($port = 80) { notify { \"${title}:${port}\": } }\nvhost { ['a', 'b']: port => 8080 }\nvhost { 'c': }",
        )
        .unwrap();
        assert_eq!(notify_titles(&catalog), vec!["a:8080", "b:8080", "c:80"]);
        let vhost = catalog.resource(&ResourceRef::new("vhost", "a")).unwrap();
        assert_eq!(vhost.kind, ResourceKind::Defined);
        let id = catalog.id_of(&ResourceRef::new("notify", "a:8080")).unwrap();
        let container = catalog.container_of(id).unwrap();
        assert_eq!(catalog.get(container).unwrap().title(), "a");
    }

    #[test]
    fn test_defines_are_hoisted() {
        let catalog = evaluate("thing { 'x': }\ndefine thing { notify { \"thing ${name}\": } }").unwrap();
        assert_eq!(notify_titles(&catalog), vec!["thing x"]);
    }

    #[test]
    fn test_unknown_resource_type() {
        let err = evaluate("\nwidget { 'w': }").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown resource type: 'widget' (file: site.pp, line: 2)"
        );
    }

    #[test]
    fn test_invalid_parameter_on_builtin_type() {
        let err = evaluate("file { '/tmp/x': colour => 'red' }").unwrap_err();
        assert!(err.to_string().contains("Invalid parameter 'colour' on File[/tmp/x]"));
    }

    #[test]
    fn test_resource_defaults_apply_to_child_scopes() {
        let catalog = evaluate(
            "File { mode => '0644' }\nclass c { file { '/b': } }\nfile { '/a': mode => '0600' }\ninclude c",
        )
        .unwrap();
        let a = catalog.resource(&ResourceRef::new("file", "/a")).unwrap();
        let b = catalog.resource(&ResourceRef::new("file", "/b")).unwrap();
        assert_eq!(a.get_str("mode"), Some("0600"));
        assert_eq!(b.get_str("mode"), Some("0644"));
    }

    #[test]
    fn test_tags_from_enclosing_classes() {
        let catalog = evaluate(
            "class apache::mod { notify { 'm': tag => 'extra' } }\ninclude apache::mod",
        )
        .unwrap();
        let notify = catalog.resource(&ResourceRef::new("notify", "m")).unwrap();
        for tag in ["notify", "apache::mod", "apache", "mod", "extra", "class"] {
            assert!(notify.tagged(tag), "missing tag {tag}");
        }
    }

    #[test]
    fn test_virtual_resources_and_realize() {
        let catalog = evaluate(
            "@notify { 'v': }\n@notify { 'hidden': }\nrealize(Notify['v'])",
        )
        .unwrap();
        let v = catalog.resource(&ResourceRef::new("notify", "v")).unwrap();
        let hidden = catalog.resource(&ResourceRef::new("notify", "hidden")).unwrap();
        assert_eq!(v.origin, Origin::Here);
        assert_eq!(hidden.origin, Origin::Virtual);
    }

    #[test]
    fn test_realize_before_declaration() {
        let catalog = evaluate("realize Notify['late']\n@notify { 'late': }").unwrap();
        let late = catalog.resource(&ResourceRef::new("notify", "late")).unwrap();
        assert_eq!(late.origin, Origin::Here);
    }

    #[test]
    fn test_realize_unknown_resource() {
        let err = evaluate("realize(Notify['ghost'])").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Evaluation Error: Failed to realize virtual resources Notify[ghost] (file: site.pp, line: 1)"
        );
    }

    #[test]
    fn test_exported_resources_keep_their_origin() {
        let catalog = evaluate("@@sql { 'db': host => 'db1' }").unwrap();
        let sql = catalog.resource(&ResourceRef::new("sql", "db")).unwrap();
        assert_eq!(sql.origin, Origin::Exported);
    }

    #[test]
    fn test_chains_record_relationships() {
        let catalog = evaluate(
            "notify { 'a': } -> notify { 'b': }\nNotify['c'] <~ Notify['b']\nnotify { 'c': }",
        )
        .unwrap();
        let relationships = catalog.relationships();
        assert_eq!(relationships.len(), 2);
        assert_eq!(relationships[0].source, ResourceRef::new("notify", "a"));
        assert_eq!(relationships[0].target, ResourceRef::new("notify", "b"));
        assert_eq!(relationships[1].source, ResourceRef::new("notify", "b"));
        assert_eq!(relationships[1].target, ResourceRef::new("notify", "c"));
        assert!(relationships[1].notification);
    }

    #[test]
    fn test_chain_operand_must_be_a_reference() {
        let err = evaluate("'a' -> Notify['b']").unwrap_err();
        assert!(err.to_string().contains("can not form a relationship with a String"));
    }

    #[test]
    fn test_conditionals_case_and_selector() {
        let catalog = evaluate_with(
            "if $osfamily == 'redhat' { notify { 'rh': } } elsif $osfamily == 'debian' { notify { 'deb': } }\n\
             unless $osfamily == 'debian' { notify { 'unless': } }\n\
             case $osfamily { default: { notify { 'other': } } 'Debian', 'Ubuntu': { notify { 'case': } } }\n\
             $pkg = $osfamily ? { 'redhat' => 'httpd', default => 'apache2' }\n\
             notify { $pkg: }",
            &[("osfamily", "debian")],
        )
        .unwrap();
        assert_eq!(notify_titles(&catalog), vec!["deb", "case", "apache2"]);
    }

    #[test]
    fn test_selector_without_match() {
        let err = evaluate("$x = 'z' ? { 'a' => 1 }").unwrap_err();
        assert!(err.to_string().contains("No matching value for selector param 'z'"));
    }

    #[test]
    fn test_arithmetic_and_membership() {
        let catalog = evaluate(
            "$n = 2 + 3 * 4\n$f = 7 / 2\nif 'b' in ['a', 'b'] and $n > 10 and 'ell' in 'Hello' { notify { \"${n} ${f}\": } }",
        )
        .unwrap();
        assert_eq!(notify_titles(&catalog), vec!["14 3"]);
    }

    #[test]
    fn test_negating_the_smallest_integer_overflows() {
        let err = evaluate("$x = -(-9223372036854775807 - 1)").unwrap_err();
        assert!(err.to_string().contains("Integer overflow"));

        let catalog = evaluate("$x = -9223372036854775808\nnotify { \"${x}\": }").unwrap();
        assert_eq!(notify_titles(&catalog), vec!["-9223372036854775808"]);
        assert!(evaluate("$x = -(-9223372036854775808)").is_err());
    }

    #[test]
    fn test_division_by_zero() {
        let err = evaluate("$x = 1 / 0").unwrap_err();
        assert!(err.to_string().contains("Division by 0"));
    }

    #[test]
    fn test_unknown_function() {
        let err = evaluate("frobnicate('x')").unwrap_err();
        assert!(matches!(err, Error::UnknownFunction { ref name, .. } if name == "frobnicate"));
    }

    #[test]
    fn test_statement_function_used_as_value() {
        let err = evaluate("$x = include('base')").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Evaluation Error: Function 'include' does not return a value (file: site.pp, line: 1)"
        );
    }

    #[test]
    fn test_rvalue_function_used_as_statement() {
        let err = evaluate("upcase('x')").unwrap_err();
        assert!(matches!(err, Error::FunctionContext { .. }));
        assert!(err.to_string().contains("Function 'upcase' must be the value of a statement"));
    }

    #[test]
    fn test_fail_aborts_with_location() {
        let err = evaluate("\n\nfail('unsupported platform')").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Evaluation Error: unsupported platform (file: site.pp, line: 3)"
        );
    }

    #[test]
    fn test_rvalue_functions() {
        let catalog = evaluate(
            "$parts = split('a,b,c', ',')\n\
             notify { join(upcase($parts), '-'): }\n\
             notify { \"size ${size($parts)}\": }\n\
             notify { \"cmp ${versioncmp('1.10', '1.9')}\": }\n\
             if defined(Class['nope']) or !defined('notify') { notify { 'wrong': } }",
        )
        .unwrap();
        assert_eq!(notify_titles(&catalog), vec!["A-B-C", "size 3", "cmp 1"]);
    }

    #[test]
    fn test_tag_and_tagged() {
        let catalog = evaluate(
            "class web { tag 'frontend'\n if tagged('frontend') { notify { 'tagged': } } }\ninclude web",
        )
        .unwrap();
        let notify = catalog.resource(&ResourceRef::new("notify", "tagged")).unwrap();
        assert!(notify.tagged("frontend"));
    }

    #[test]
    fn test_require_and_contain() {
        let catalog = evaluate(
            "class db { }\nclass cache { }\nclass app { require db\n contain cache }\ninclude app",
        )
        .unwrap();
        let relationship = &catalog.relationships()[0];
        assert_eq!(relationship.source, ResourceRef::class("db"));
        assert_eq!(relationship.target, ResourceRef::class("app"));

        let cache = catalog.id_of(&ResourceRef::class("cache")).unwrap();
        let app = catalog.id_of(&ResourceRef::class("app")).unwrap();
        assert_eq!(catalog.container_of(cache), Some(app));
        let db = catalog.id_of(&ResourceRef::class("db")).unwrap();
        let main_stage = catalog.id_of(&ResourceRef::new("stage", "main")).unwrap();
        assert_eq!(catalog.container_of(db), Some(main_stage));
    }

    #[test]
    fn test_stage_placement() {
        let catalog = evaluate(
            "stage { 'pre': before => Stage['main'] }\nclass early { }\nclass { 'early': stage => 'pre' }",
        )
        .unwrap();
        let early = catalog.id_of(&ResourceRef::class("early")).unwrap();
        let pre = catalog.id_of(&ResourceRef::new("stage", "pre")).unwrap();
        assert_eq!(catalog.container_of(early), Some(pre));
        assert_eq!(catalog.get(pre).unwrap().kind, ResourceKind::Stage);

        let err = evaluate("class late { }\nclass { 'late': stage => 'post' }").unwrap_err();
        assert!(err.to_string().contains("Could not find stage post specified by Class[Late]"));
    }

    #[test]
    fn test_main_class_holds_top_level_resources() {
        let catalog = evaluate("notify { 'top': }").unwrap();
        let id = catalog.id_of(&ResourceRef::new("notify", "top")).unwrap();
        let container = catalog.container_of(id).unwrap();
        assert_eq!(catalog.get(container).unwrap().reference, ResourceRef::class("main"));
        let main_stage = catalog.id_of(&ResourceRef::new("stage", "main")).unwrap();
        assert_eq!(catalog.container_of(container), Some(main_stage));
    }

    #[test]
    fn test_node_matching() {
        let code = "node 'db1' { notify { 'db': } }\nnode 'web1' { notify { 'short': } }\nnode default { notify { 'default': } }";
        assert_eq!(notify_titles(&evaluate(code).unwrap()), vec!["short"]);

        let exact = "node 'web1.example.com' { notify { 'exact': } }\nnode 'web1' { notify { 'short': } }";
        assert_eq!(notify_titles(&evaluate(exact).unwrap()), vec!["exact"]);

        let err = evaluate("node 'db1' { }").unwrap_err();
        assert!(
            err.to_string()
                .contains("Could not find node statement with name 'default' or 'web1.example.com'")
        );
    }

    #[test]
    fn test_nested_class_definitions() {
        let catalog = evaluate("class outer { class inner { notify { 'in': } } }\ninclude outer::inner").unwrap();
        assert_eq!(notify_titles(&catalog), vec!["in"]);
    }

    #[test]
    fn test_site_and_application_components() {
        let catalog = evaluate(
            "define db_server($user) { notify { \"db ${user}\": } }\n\
             application lamp($user) { db_server { $name: user => $user } }\n\
             site { lamp { 'prod': user => 'admin' } }",
        )
        .unwrap();
        let lamp = catalog.resource(&ResourceRef::new("lamp", "prod")).unwrap();
        assert_eq!(lamp.kind, ResourceKind::Application);
        let component = catalog.resource(&ResourceRef::new("db_server", "prod")).unwrap();
        assert!(component.component);
        assert_eq!(notify_titles(&catalog), vec!["db admin"]);
    }

    #[test]
    fn test_identical_duplicate_is_accepted() {
        let catalog = evaluate(
            "file { '/etc/passwd': ensure => file }\nfile { '/etc/passwd': ensure => file }",
        )
        .unwrap();
        assert_eq!(
            catalog
                .resources()
                .filter(|(_, r)| r.type_name() == "file")
                .count(),
            1
        );
    }

    #[test]
    fn test_differing_duplicate_names_both_locations() {
        let err = evaluate(
            "file { '/etc/passwd': ensure => file }\nfile { '/etc/passwd': ensure => absent }",
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Duplicate declaration: File[/etc/passwd] is already declared at (file: site.pp, line: 1); \
             cannot redeclare at (file: site.pp, line: 2)"
        );
    }

    #[test]
    fn test_autoload_from_modulepath() {
        let dir = tempfile::tempdir().unwrap();
        let manifests = dir.path().join("ntp/manifests");
        std::fs::create_dir_all(&manifests).unwrap();
        std::fs::write(manifests.join("init.pp"), "class ntp { ntp::server { 'pool': } }\n").unwrap();
        std::fs::write(
            manifests.join("server.pp"),
            "define ntp::server { notify { \"server ${title}\": } }\n",
        )
        .unwrap();

        let types = types();
        let functions = FunctionRegistry::builtin();
        let env = Environment::new("production").with_modulepath([dir.path().to_path_buf()]);
        let cache = ManifestCache::new();
        let loader = Loader::new(&env, &cache);
        let mut evaluator =
            Evaluator::new("node1", &HashMap::new(), &types, &functions, loader).unwrap();
        let program = Arc::new(parse_str("include ntp", Some("site.pp")).unwrap());
        evaluator.evaluate_programs(&[program]).unwrap();
        let catalog = evaluator.finish().unwrap();

        assert_eq!(notify_titles(&catalog), vec!["server pool"]);
        let server = catalog.resource(&ResourceRef::new("notify", "server pool")).unwrap();
        assert!(
            server
                .location
                .file
                .as_deref()
                .is_some_and(|f| f.ends_with("server.pp"))
        );
    }

    #[test]
    fn test_missing_class() {
        let err = evaluate("include nope").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Evaluation Error: Could not find class nope for web1.example.com (file: site.pp, line: 1)"
        );
    }
}
