//! Applying catalogs compiled from manifests

use catalog::{Resource, ResourceType, TypeRegistry, Value};
use language::{Environment, compile};
use provider::{Host, Provider, ProviderEntry, ProviderRegistry, State};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use transaction::{NoProgress, Status, Transaction, TransactionOptions, TransactionReport};

/// Records every call; titles listed in `broken` fail to sync
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
    broken: Vec<String>,
}

impl Provider for Recorder {
    fn retrieve(&self, resource: &Resource) -> anyhow::Result<State> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("retrieve {}", resource.title()));
        Ok(State::from([("message".to_string(), Value::Undef)]))
    }

    fn sync(&self, resource: &Resource, _property: &str, _desired: &Value) -> anyhow::Result<()> {
        if self.broken.iter().any(|t| t == resource.title()) {
            anyhow::bail!("cannot say {}", resource.title());
        }
        self.calls
            .lock()
            .unwrap()
            .push(format!("sync {}", resource.title()));
        Ok(())
    }

    fn refresh(&self, resource: &Resource) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("refresh {}", resource.title()));
        Ok(())
    }
}

fn apply(code: &str, broken: &[&str], noop: bool) -> (TransactionReport, Vec<String>) {
    let mut types = TypeRegistry::new();
    types.register(ResourceType::builtin("notify").namevar("message").property("message"));
    let env = Environment::new("production").with_code("site.pp", code);
    let catalog = compile("web1", &HashMap::new(), &env, &types).unwrap();

    let recorder = Arc::new(Recorder {
        broken: broken.iter().map(ToString::to_string).collect(),
        ..Recorder::default()
    });
    let mut providers = ProviderRegistry::new();
    providers.register(ProviderEntry::new("notify", "recorder", recorder.clone()));
    let host = Host::from_facts(HashMap::new());

    let report = Transaction::new(&catalog, &types, &providers, &host)
        .with_options(TransactionOptions { noop })
        .evaluate(&mut NoProgress)
        .unwrap();
    let calls = recorder.calls.lock().unwrap().clone();
    (report, calls)
}

#[test]
fn test_parameterized_class_applies_one_resource() {
    let (report, calls) = apply(
        "class x($y, $z = '2') { notify { \"${y}-${z}\": } }\nclass { 'x': y => '1' }",
        &[],
        false,
    );
    assert_eq!(report.order(), vec!["Notify[1-2]"]);
    assert_eq!(calls, vec!["retrieve 1-2", "sync 1-2"]);
}

#[test]
fn test_chains_order_the_run() {
    let (report, _) = apply(
        "notify { 'c': }\nnotify { 'b': }\nnotify { 'a': }\nNotify['a'] -> Notify['b'] -> Notify['c']",
        &[],
        false,
    );
    assert_eq!(report.order(), vec!["Notify[a]", "Notify[b]", "Notify[c]"]);
}

#[test]
fn test_failure_skips_everything_that_requires_it() {
    let (report, calls) = apply(
        "class db { notify { 'schema': } }\n\
         class app { notify { 'deploy': } }\n\
         include db, app\n\
         Class['db'] -> Class['app']\n\
         notify { 'unrelated': }\n\
         notify { 'watcher': subscribe => Notify['schema'] }",
        &["schema"],
        false,
    );
    assert_eq!(report.status_of("Notify[schema]"), Some(Status::Failed));
    assert_eq!(report.status_of("Notify[deploy]"), Some(Status::Skipped));
    assert_eq!(report.status_of("Notify[unrelated]"), Some(Status::Changed));
    // notification edges carry events, not failures
    assert_eq!(report.status_of("Notify[watcher]"), Some(Status::Changed));
    assert!(!calls.iter().any(|c| c.ends_with("deploy")));
    assert!(!calls.contains(&"refresh watcher".to_string()));
    assert_eq!(report.exit_code(true), 6);
}

#[test]
fn test_subscribers_refresh_once_before_applying() {
    let (_, calls) = apply(
        "notify { 'one': notify => Notify['svc'] }\n\
         notify { 'two': notify => Notify['svc'] }\n\
         notify { 'svc': }",
        &[],
        false,
    );
    let refreshes = calls.iter().filter(|c| *c == "refresh svc").count();
    assert_eq!(refreshes, 1);
    let refresh_at = calls.iter().position(|c| c == "refresh svc").unwrap();
    let sync_at = calls.iter().position(|c| c == "sync svc").unwrap();
    assert!(refresh_at < sync_at);
}

#[test]
fn test_noop_run_syncs_nothing() {
    let (report, calls) = apply("notify { 'hello': }\nnotify { 'quiet': noop => false }", &[], true);
    assert_eq!(report.status_of("Notify[hello]"), Some(Status::Noop));
    // the per-resource flag wins over the run's
    assert_eq!(report.status_of("Notify[quiet]"), Some(Status::Changed));
    assert_eq!(calls.iter().filter(|c| c.starts_with("sync")).count(), 1);
}
