//! Execution engine - applies a catalog's resources in dependency order
//!
//! The walk is single threaded and deterministic: resources are evaluated
//! strictly in the relationship graph's topological order, ties broken by
//! declaration order. Every provider error is contained to its resource,
//! which is marked failed; resources depending on it through ordering
//! edges are skipped. A notification alone does not carry a failure, but a
//! notification that is also declared as a dependency does.

use crate::context::ProgressCallback;
use crate::error::{Error, ResourceApplyError, Result};
use crate::report::TransactionReport;
use crate::retry::{LogCallback, RetryPolicy, with_retry};
use crate::types::{Event, EventStatus, ResourceStatus, Status, TransactionOptions};
use catalog::{Catalog, RelationshipGraph, Resource, ResourceId, TypeRegistry, Value, Vertex};
use provider::{Host, Provider, ProviderEntry, ProviderRegistry, change_message};
use std::collections::HashMap;
use std::time::Instant;

/// Per-vertex bookkeeping during the walk
#[derive(Debug, Clone, Copy, Default)]
struct VertexState {
    /// Failed or skipped, directly or through a container
    blocked: bool,
    /// Successful changes this vertex reports to notification targets
    events: usize,
    /// Events received from notifying predecessors, not yet acted on
    pending_refresh: usize,
}

/// One property that needs to change
#[derive(Debug, Clone)]
struct Change {
    property: String,
    previous: Value,
    desired: Value,
}

/// Applies a compiled catalog against the host
pub struct Transaction<'a> {
    catalog: &'a Catalog,
    types: &'a TypeRegistry,
    providers: &'a ProviderRegistry,
    host: &'a Host,
    options: TransactionOptions,
}

impl<'a> Transaction<'a> {
    pub fn new(
        catalog: &'a Catalog,
        types: &'a TypeRegistry,
        providers: &'a ProviderRegistry,
        host: &'a Host,
    ) -> Self {
        Self {
            catalog,
            types,
            providers,
            host,
            options: TransactionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    /// Apply every managed resource once and report what happened
    ///
    /// Graph and provider-selection problems are fatal and returned before
    /// any resource is touched. Per-resource failures are recorded in the
    /// report instead.
    pub fn evaluate<P: ProgressCallback>(&self, progress: &mut P) -> Result<TransactionReport> {
        let started = Instant::now();
        let result = self.run(progress, started);
        // fact and confine values must not leak into the next run
        self.host.reset();
        result
    }

    fn run<P: ProgressCallback>(&self, progress: &mut P, started: Instant) -> Result<TransactionReport> {
        let graph = RelationshipGraph::build(self.catalog, self.types)?;
        let order = graph.topological_order(self.catalog)?;
        let providers = self.resolve_providers(&graph)?;

        let mut report = TransactionReport::new(
            &self.catalog.name,
            &self.catalog.environment,
            self.catalog.version,
            self.options.noop,
        );
        progress.on_transaction_start(providers.len());

        let mut state = vec![VertexState::default(); graph.vertex_count()];
        for v in order {
            let blocked = graph
                .in_edges(v)
                .any(|e| e.label.dependency && state[e.source].blocked);
            state[v].blocked = blocked;

            match graph.vertex(v) {
                Vertex::Admissible(_) => {
                    // a notification sent to a container refreshes its contents
                    let pending = state[v].pending_refresh;
                    if pending > 0 && !blocked {
                        for edge in graph.out_edges(v).filter(|e| e.label.containment) {
                            state[edge.target].pending_refresh += pending;
                        }
                    }
                }
                Vertex::Completed(_) => {
                    state[v].events = graph
                        .in_edges(v)
                        .filter(|e| e.label.containment)
                        .map(|e| state[e.source].events)
                        .sum();
                }
                Vertex::Resource(id) => {
                    let Some(resource) = self.catalog.get(id) else {
                        continue;
                    };
                    progress.on_resource_start(&resource.reference.to_string());
                    let status = if blocked {
                        Self::skip(resource)
                    } else {
                        match providers.get(&id) {
                            Some(entry) => self.evaluate_resource(resource, entry, state[v].pending_refresh),
                            None => Self::skip(resource),
                        }
                    };
                    state[v].blocked = status.status.blocks_dependents();
                    state[v].events = if status.status == Status::Changed {
                        status.change_count()
                    } else {
                        0
                    };
                    progress.on_resource_complete(&status);
                    report.add(status);
                }
            }

            // every edge points forward in the order, so targets are still pending
            let events = state[v].events;
            if events == 0 {
                continue;
            }
            for edge in graph.out_edges(v).filter(|e| e.label.notification) {
                state[edge.target].pending_refresh += events;
            }
        }

        report.finalize(started.elapsed().as_secs_f64());
        progress.on_transaction_complete(&report);
        Ok(report)
    }

    /// Pick each resource's provider up front; selection is cached per type
    /// (and explicit provider name) for the run
    fn resolve_providers(&self, graph: &RelationshipGraph) -> Result<HashMap<ResourceId, &'a ProviderEntry>> {
        let mut by_type: HashMap<(String, Option<String>), &'a ProviderEntry> = HashMap::new();
        let mut resolved = HashMap::new();

        for v in 0..graph.vertex_count() {
            let Vertex::Resource(id) = graph.vertex(v) else {
                continue;
            };
            let Some(resource) = self.catalog.get(id) else {
                continue;
            };
            let key = (
                resource.type_name().to_string(),
                resource.get_str("provider").map(str::to_lowercase),
            );
            let entry = match by_type.get(&key) {
                Some(entry) => *entry,
                None => {
                    let entry = self
                        .providers
                        .for_resource(resource, self.host)
                        .map_err(|source| Error::Provider {
                            reference: resource.reference.to_string(),
                            location: resource.location.clone(),
                            source,
                        })?;
                    by_type.insert(key, entry);
                    entry
                }
            };
            resolved.insert(id, entry);
        }
        Ok(resolved)
    }

    fn skip(resource: &Resource) -> ResourceStatus {
        let mut status = ResourceStatus::new(resource);
        status.status = Status::Skipped;
        log::warn!("{}: Skipping because of failed dependencies", resource.reference);
        status.logs.push("Skipping because of failed dependencies".to_string());
        status
    }

    fn noop_for(&self, resource: &Resource) -> bool {
        resource.noop().unwrap_or(self.options.noop)
    }

    fn evaluate_resource(&self, resource: &Resource, entry: &ProviderEntry, pending: usize) -> ResourceStatus {
        let started = Instant::now();
        let mut status = ResourceStatus::new(resource);
        status.provider = Some(entry.name.clone());
        let noop = self.noop_for(resource);
        let provider = entry.provider.as_ref();

        if pending > 0 {
            if noop {
                status.log(format!("Would have triggered 'refresh' from {pending} events"));
                status.status = Status::Noop;
            } else if let Err(e) = provider.refresh(resource) {
                self.fail(resource, &mut status, &e);
                status.duration = started.elapsed().as_secs_f64();
                return status;
            } else {
                status.refreshed = true;
                status.log(format!("Triggered 'refresh' from {pending} events"));
            }
        }

        if let Err(e) = self.apply(resource, provider, noop, &mut status) {
            self.fail(resource, &mut status, &e);
        }
        status.duration = started.elapsed().as_secs_f64();
        status
    }

    fn fail(&self, resource: &Resource, status: &mut ResourceStatus, error: &anyhow::Error) {
        let err = ResourceApplyError::new(resource.reference.to_string(), error, resource.location.clone());
        log::error!("{err}");
        status.status = Status::Failed;
        status.error = Some(err.message);
    }

    /// Retrieve, compare, and converge one resource
    fn apply(
        &self,
        resource: &Resource,
        provider: &dyn Provider,
        noop: bool,
        status: &mut ResourceStatus,
    ) -> anyhow::Result<()> {
        let current = provider.retrieve(resource)?;
        let changes = self.changes(resource, provider, &current);
        if changes.is_empty() {
            return Ok(());
        }

        if noop {
            for change in changes {
                let message = format!(
                    "current_value {}, should be {} (noop)",
                    change.previous, change.desired
                );
                status.log(message.clone());
                status.events.push(Event {
                    property: change.property,
                    previous: change.previous,
                    desired: change.desired,
                    message,
                    status: EventStatus::Noop,
                });
            }
            status.status = Status::Noop;
            return Ok(());
        }

        let reference = resource.reference.to_string();
        let policy = RetryPolicy::from_resource(resource);
        let callback = LogCallback {
            reference: &reference,
        };
        with_retry(&policy, Some(&callback), || {
            Self::sync_changes(resource, provider, &changes)
        })?;

        for change in changes {
            let message = change_message(&change.property, &change.previous, &change.desired);
            status.log(message.clone());
            status.events.push(Event {
                property: change.property,
                previous: change.previous,
                desired: change.desired,
                message,
                status: EventStatus::Success,
            });
        }
        status.status = Status::Changed;
        Ok(())
    }

    /// Properties whose current value does not satisfy the declaration
    ///
    /// When `ensure` creates or removes the resource, that is the only change.
    fn changes(&self, resource: &Resource, provider: &dyn Provider, current: &provider::State) -> Vec<Change> {
        let Some(resource_type) = self.types.get(resource.type_name()) else {
            return Vec::new();
        };
        let mut changes = Vec::new();

        if resource_type.is_property("ensure")
            && let Some(desired) = resource.get("ensure")
        {
            let previous = match current.get("ensure") {
                Some(Value::Undef) | None => Value::from("absent"),
                Some(value) => value.clone(),
            };
            let absent_now = previous.as_str() == Some("absent");
            let want_absent = desired.as_str() == Some("absent");
            if !provider.insync("ensure", &previous, desired) {
                changes.push(Change {
                    property: "ensure".to_string(),
                    previous,
                    desired: desired.clone(),
                });
                if absent_now || want_absent {
                    return changes;
                }
            } else if want_absent {
                return changes;
            }
        }

        for property in &resource_type.properties {
            if property == "ensure" {
                continue;
            }
            // a property that is also the namevar defaults to the title
            let desired = match resource.get(property) {
                Some(value) => value.clone(),
                None if *property == resource_type.namevar => Value::from(resource.title()),
                None => continue,
            };
            let previous = current.get(property).cloned().unwrap_or_default();
            if !provider.insync(property, &previous, &desired) {
                changes.push(Change {
                    property: property.clone(),
                    previous,
                    desired,
                });
            }
        }
        changes
    }

    fn sync_changes(resource: &Resource, provider: &dyn Provider, changes: &[Change]) -> anyhow::Result<()> {
        for change in changes {
            if change.property == "ensure" {
                if change.desired.as_str() == Some("absent") {
                    provider.destroy(resource)?;
                } else if change.previous.as_str() == Some("absent") {
                    provider.create(resource)?;
                } else {
                    provider.sync(resource, "ensure", &change.desired)?;
                }
            } else {
                provider.sync(resource, &change.property, &change.desired)?;
            }
        }
        provider.flush(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use catalog::{ResourceKind, ResourceRef, ResourceType};
    use provider::{ProviderEntry, State};
    use std::sync::{Arc, Mutex};

    /// In-memory system: title -> (value) plus a call log
    #[derive(Default)]
    struct MockSystem {
        present: HashMap<String, String>,
        calls: Vec<String>,
        attempts: HashMap<String, i64>,
    }

    struct MockProvider {
        system: Arc<Mutex<MockSystem>>,
    }

    impl MockProvider {
        fn check_failure(&self, resource: &Resource) -> anyhow::Result<()> {
            if resource.get("fail").and_then(Value::as_bool) == Some(true) {
                anyhow::bail!("simulated failure");
            }
            if let Some(flaky) = resource.get("flaky").and_then(Value::as_integer) {
                let mut system = self.system.lock().unwrap();
                let attempts = system.attempts.entry(resource.title().to_string()).or_insert(0);
                *attempts += 1;
                if *attempts <= flaky {
                    anyhow::bail!("flaky attempt {}", attempts);
                }
            }
            Ok(())
        }

        fn record(&self, call: String) {
            self.system.lock().unwrap().calls.push(call);
        }
    }

    impl Provider for MockProvider {
        fn retrieve(&self, resource: &Resource) -> anyhow::Result<State> {
            self.record(format!("retrieve {}", resource.title()));
            let system = self.system.lock().unwrap();
            let mut state = State::new();
            match system.present.get(resource.title()) {
                Some(value) => {
                    state.insert("ensure".into(), Value::from("present"));
                    state.insert("value".into(), Value::from(value.as_str()));
                }
                None => {
                    state.insert("ensure".into(), Value::from("absent"));
                }
            }
            Ok(state)
        }

        fn create(&self, resource: &Resource) -> anyhow::Result<()> {
            self.check_failure(resource)?;
            self.record(format!("create {}", resource.title()));
            let value = resource.get_str("value").unwrap_or_default().to_string();
            self.system
                .lock()
                .unwrap()
                .present
                .insert(resource.title().to_string(), value);
            Ok(())
        }

        fn destroy(&self, resource: &Resource) -> anyhow::Result<()> {
            self.record(format!("destroy {}", resource.title()));
            self.system.lock().unwrap().present.remove(resource.title());
            Ok(())
        }

        fn sync(&self, resource: &Resource, property: &str, desired: &Value) -> anyhow::Result<()> {
            self.check_failure(resource)?;
            self.record(format!("sync {} {}", resource.title(), property));
            self.system
                .lock()
                .unwrap()
                .present
                .insert(resource.title().to_string(), desired.to_string());
            Ok(())
        }

        fn refresh(&self, resource: &Resource) -> anyhow::Result<()> {
            self.record(format!("refresh {}", resource.title()));
            Ok(())
        }
    }

    struct Fixture {
        system: Arc<Mutex<MockSystem>>,
        types: TypeRegistry,
        providers: ProviderRegistry,
        host: Host,
        catalog: Catalog,
        main: ResourceId,
    }

    impl Fixture {
        fn new() -> Self {
            let system = Arc::new(Mutex::new(MockSystem::default()));
            let mut types = TypeRegistry::new();
            types.register(
                ResourceType::builtin("mock")
                    .property("ensure")
                    .property("value")
                    .parameter("fail")
                    .parameter("flaky"),
            );
            let mut providers = ProviderRegistry::new();
            providers.register(ProviderEntry::new(
                "mock",
                "memory",
                Arc::new(MockProvider {
                    system: Arc::clone(&system),
                }),
            ));
            let mut catalog = Catalog::new("node1", "production");
            let stage = catalog
                .add_resource(Resource::new("stage", "main").with_kind(ResourceKind::Stage))
                .unwrap();
            let main = catalog
                .add_contained(stage, Resource::new("class", "main").with_kind(ResourceKind::Class))
                .unwrap();
            Self {
                system,
                types,
                providers,
                host: Host::from_facts(HashMap::new()),
                catalog,
                main,
            }
        }

        fn add(&mut self, title: &str, params: &[(&str, Value)]) -> ResourceId {
            self.add_to(self.main, title, params)
        }

        fn add_to(&mut self, container: ResourceId, title: &str, params: &[(&str, Value)]) -> ResourceId {
            let mut resource = Resource::new("mock", title).with_param("ensure", "present");
            for (name, value) in params {
                resource.set(name, value.clone());
            }
            self.catalog.add_contained(container, resource).unwrap()
        }

        fn run(&self, noop: bool) -> TransactionReport {
            Transaction::new(&self.catalog, &self.types, &self.providers, &self.host)
                .with_options(TransactionOptions { noop })
                .evaluate(&mut NoProgress)
                .unwrap()
        }

        fn calls(&self) -> Vec<String> {
            self.system.lock().unwrap().calls.clone()
        }
    }

    fn mock(title: &str) -> Value {
        Value::Ref(ResourceRef::new("mock", title))
    }

    #[test]
    fn test_applies_in_dependency_order() {
        let mut f = Fixture::new();
        f.add("c", &[("require", mock("b"))]);
        f.add("b", &[("require", mock("a"))]);
        f.add("a", &[]);

        let report = f.run(false);
        assert_eq!(report.order(), vec!["Mock[a]", "Mock[b]", "Mock[c]"]);
        assert!(report.resource_statuses.iter().all(|s| s.status == Status::Changed));
        let creates: Vec<String> = f.calls().into_iter().filter(|c| c.starts_with("create")).collect();
        assert_eq!(creates, vec!["create a", "create b", "create c"]);
    }

    #[test]
    fn test_second_run_is_unchanged() {
        let mut f = Fixture::new();
        f.add("a", &[("value", Value::from("1"))]);
        f.add("b", &[("notify", mock("a"))]);

        assert_eq!(f.run(false).exit_code(true), 2);
        let second = f.run(false);
        assert!(second.resource_statuses.iter().all(|s| s.status == Status::Unchanged));
        assert_eq!(second.exit_code(true), 0);
    }

    #[test]
    fn test_failure_skips_dependents_only() {
        let mut f = Fixture::new();
        f.add("x", &[("fail", Value::Bool(true))]);
        f.add("y", &[("require", mock("x"))]);
        f.add("z", &[("require", mock("y"))]);
        f.add("w", &[]);
        f.add("listener", &[("subscribe", mock("x"))]);

        let report = f.run(false);
        assert_eq!(report.status_of("Mock[x]"), Some(Status::Failed));
        assert_eq!(report.status_of("Mock[y]"), Some(Status::Skipped));
        assert_eq!(report.status_of("Mock[z]"), Some(Status::Skipped));
        assert_eq!(report.status_of("Mock[w]"), Some(Status::Changed));
        assert_eq!(report.status_of("Mock[listener]"), Some(Status::Changed));
        assert_eq!(report.exit_code(true), 6);
        assert!(!f.calls().iter().any(|c| c.ends_with(" y") || c.ends_with(" z")));
    }

    #[test]
    fn test_require_next_to_notify_still_skips() {
        let mut f = Fixture::new();
        f.add("x", &[("fail", Value::Bool(true)), ("notify", mock("y"))]);
        f.add("y", &[("require", mock("x"))]);

        let report = f.run(false);
        assert_eq!(report.status_of("Mock[x]"), Some(Status::Failed));
        assert_eq!(report.status_of("Mock[y]"), Some(Status::Skipped));

        let mut f = Fixture::new();
        f.add("x", &[("fail", Value::Bool(true))]);
        f.add("y", &[("require", mock("x")), ("subscribe", mock("x"))]);

        let report = f.run(false);
        assert_eq!(report.status_of("Mock[y]"), Some(Status::Skipped));
        assert!(!f.calls().iter().any(|c| c.ends_with(" y")));
    }

    #[test]
    fn test_failure_inside_class_skips_class_dependents() {
        let mut f = Fixture::new();
        let class = f
            .catalog
            .add_contained(f.main, Resource::new("class", "web").with_kind(ResourceKind::Class))
            .unwrap();
        f.add_to(class, "broken", &[("fail", Value::Bool(true))]);
        f.add("after", &[("require", Value::Ref(ResourceRef::class("web")))]);

        let report = f.run(false);
        assert_eq!(report.status_of("Mock[after]"), Some(Status::Skipped));
    }

    #[test]
    fn test_refresh_is_deduplicated_and_precedes_apply() {
        let mut f = Fixture::new();
        f.add("a", &[("notify", mock("svc"))]);
        f.add("b", &[("notify", mock("svc"))]);
        f.add("svc", &[]);

        let report = f.run(false);
        let calls = f.calls();
        let refreshes: Vec<&String> = calls.iter().filter(|c| c.starts_with("refresh")).collect();
        assert_eq!(refreshes, vec!["refresh svc"]);
        let refresh_at = calls.iter().position(|c| c == "refresh svc").unwrap();
        let retrieve_at = calls.iter().position(|c| c == "retrieve svc").unwrap();
        assert!(refresh_at < retrieve_at);

        let svc = &report.resource_statuses[2];
        assert!(svc.refreshed);
        assert!(svc.logs.iter().any(|l| l == "Triggered 'refresh' from 2 events"));
    }

    #[test]
    fn test_unchanged_source_does_not_refresh() {
        let mut f = Fixture::new();
        f.system.lock().unwrap().present.insert("a".into(), String::new());
        f.add("a", &[("notify", mock("svc"))]);
        f.add("svc", &[]);

        f.run(false);
        assert!(!f.calls().iter().any(|c| c.starts_with("refresh")));
    }

    #[test]
    fn test_notifying_a_class_refreshes_its_contents() {
        let mut f = Fixture::new();
        let class = f
            .catalog
            .add_contained(f.main, Resource::new("class", "app").with_kind(ResourceKind::Class))
            .unwrap();
        f.add_to(class, "worker", &[]);
        f.add("config", &[("notify", Value::Ref(ResourceRef::class("app")))]);

        f.run(false);
        assert!(f.calls().contains(&"refresh worker".to_string()));
    }

    #[test]
    fn test_noop_makes_no_changes() {
        let mut f = Fixture::new();
        f.add("a", &[("notify", mock("b"))]);
        f.add("b", &[]);

        let report = f.run(true);
        assert!(report.noop);
        assert_eq!(report.status_of("Mock[a]"), Some(Status::Noop));
        assert!(f.calls().iter().all(|c| c.starts_with("retrieve")));
        assert_eq!(report.exit_code(true), 0);
    }

    #[test]
    fn test_noop_target_logs_would_have_refreshed() {
        let mut f = Fixture::new();
        f.add("a", &[("notify", mock("b"))]);
        f.system.lock().unwrap().present.insert("b".into(), String::new());
        f.add("b", &[("noop", Value::Bool(true))]);

        let report = f.run(false);
        assert_eq!(report.status_of("Mock[a]"), Some(Status::Changed));
        let b = &report.resource_statuses[1];
        assert_eq!(b.status, Status::Noop);
        assert!(b.logs.iter().any(|l| l == "Would have triggered 'refresh' from 1 events"));
        assert!(!f.calls().contains(&"refresh b".to_string()));
    }

    #[test]
    fn test_retries_until_success() {
        let mut f = Fixture::new();
        f.add("flaky", &[("flaky", Value::Integer(2)), ("tries", Value::Integer(3))]);
        let report = f.run(false);
        assert_eq!(report.status_of("Mock[flaky]"), Some(Status::Changed));

        let mut f = Fixture::new();
        f.add("flaky", &[("flaky", Value::Integer(2)), ("tries", Value::Integer(2))]);
        let report = f.run(false);
        assert_eq!(report.status_of("Mock[flaky]"), Some(Status::Failed));
    }

    #[test]
    fn test_missing_provider_is_fatal_before_apply() {
        let mut f = Fixture::new();
        f.add("a", &[]);
        f.catalog
            .add_contained(f.main, Resource::new("package", "vim"))
            .unwrap();

        let err = Transaction::new(&f.catalog, &f.types, &f.providers, &f.host)
            .evaluate(&mut NoProgress)
            .unwrap_err();
        assert!(err.to_string().contains("Could not find a suitable provider for package"));
        assert!(f.calls().is_empty());
    }

    #[test]
    fn test_cycle_is_fatal_before_apply() {
        let mut f = Fixture::new();
        f.add("a", &[("require", mock("b"))]);
        f.add("b", &[("require", mock("a"))]);

        let result = Transaction::new(&f.catalog, &f.types, &f.providers, &f.host).evaluate(&mut NoProgress);
        assert!(matches!(result, Err(Error::Catalog(catalog::Error::Cycle { .. }))));
        assert!(f.calls().is_empty());
    }

    #[test]
    fn test_ensure_absent_destroys() {
        let mut f = Fixture::new();
        f.system.lock().unwrap().present.insert("old".into(), "1".into());
        let id = f.add("old", &[]);
        f.catalog.get_mut(id).unwrap().set("ensure", "absent");

        let report = f.run(false);
        assert_eq!(report.status_of("Mock[old]"), Some(Status::Changed));
        assert!(f.calls().contains(&"destroy old".to_string()));
        assert_eq!(report.resource_statuses[0].events[0].message, "removed");
    }
}
