//! Variable scopes
//!
//! Scopes form a chain: a lookup that misses locally falls through to the
//! parent. Several child scopes can share one parent, so parents are held
//! behind `Rc`. A scope also remembers the resource its declarations are
//! contained by and the resource defaults set inside it.

use catalog::{ResourceId, Value};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug)]
pub struct Scope {
    parent: Option<Rc<Scope>>,
    /// Class name for class scopes, empty otherwise
    name: String,
    container: ResourceId,
    variables: RefCell<HashMap<String, Value>>,
    defaults: RefCell<HashMap<String, IndexMap<String, Value>>>,
}

impl Scope {
    /// The top scope, whose declarations land in `container`
    pub fn top(container: ResourceId) -> Rc<Self> {
        Rc::new(Self {
            parent: None,
            name: String::new(),
            container,
            variables: RefCell::default(),
            defaults: RefCell::default(),
        })
    }

    pub fn child(parent: &Rc<Self>, name: &str, container: ResourceId) -> Rc<Self> {
        Rc::new(Self {
            parent: Some(Rc::clone(parent)),
            name: name.to_string(),
            container,
            variables: RefCell::default(),
            defaults: RefCell::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container(&self) -> ResourceId {
        self.container
    }

    pub fn parent(&self) -> Option<&Rc<Self>> {
        self.parent.as_ref()
    }

    /// Assign a variable; returns false when it is already set here
    pub fn set(&self, name: &str, value: Value) -> bool {
        let mut variables = self.variables.borrow_mut();
        if variables.contains_key(name) {
            return false;
        }
        variables.insert(name.to_string(), value);
        true
    }

    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.variables.borrow().get(name).cloned()
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.get_local(name) {
            return Some(value);
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Record `Type { param => value }` for this scope
    pub fn set_defaults(&self, type_name: &str, params: IndexMap<String, Value>) {
        self.defaults
            .borrow_mut()
            .entry(type_name.to_string())
            .or_default()
            .extend(params);
    }

    /// Defaults for `type_name` visible here, inner scopes overriding outer
    pub fn defaults_for(&self, type_name: &str) -> IndexMap<String, Value> {
        let mut merged = self
            .parent
            .as_ref()
            .map(|p| p.defaults_for(type_name))
            .unwrap_or_default();
        if let Some(local) = self.defaults.borrow().get(type_name) {
            for (name, value) in local {
                merged.insert(name.clone(), value.clone());
            }
        }
        merged
    }
}
