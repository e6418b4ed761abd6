//! End-to-end compile scenarios

use catalog::{Catalog, Origin, ResourceRef, ResourceType, TypeRegistry, ValidationKind};
use language::{CompileRequest, CompileService, Environment, Error, compile};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

fn types() -> TypeRegistry {
    let mut types = TypeRegistry::new();
    types.register(ResourceType::builtin("notify").property("message"));
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

fn compile_code(code: &str) -> Result<Catalog, Error> {
    let env = Environment::new("production").with_code("site.pp", code);
    compile("web1", &HashMap::new(), &env, &types())
}

fn managed(catalog: &Catalog, type_name: &str) -> Vec<String> {
    catalog
        .managed_resources()
        .filter(|(_, r)| r.type_name() == type_name)
        .map(|(_, r)| r.title().to_string())
        .collect()
}

#[test]
fn test_parameterized_class_yields_exactly_one_resource() {
    let catalog =
        compile_code("class x($y,$z='2'){ notify{\"${y}-${z}\":} } class{x: y=>'1'}").unwrap();
    assert_eq!(managed(&catalog, "notify"), vec!["1-2"]);
    assert_eq!(catalog.classes, vec!["x"]);
}

#[test]
fn test_identical_redeclaration_is_accepted() {
    let catalog = compile_code(
        "file { '/etc/passwd': ensure => file }\nfile { '/etc/passwd': ensure => file }",
    )
    .unwrap();
    assert_eq!(managed(&catalog, "file"), vec!["/etc/passwd"]);
}

#[test]
fn test_conflicting_redeclaration_names_both_locations() {
    let err = compile_code(
        "file { '/etc/passwd': ensure => file }\nfile { '/etc/passwd': ensure => absent }",
    )
    .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("File[/etc/passwd]"));
    assert!(message.contains("(file: site.pp, line: 1)"));
    assert!(message.contains("(file: site.pp, line: 2)"));
}

#[test]
fn test_consumed_capability_without_exporter_fails() {
    let err = compile_code(
        "sql { 'db': host => 'db1' }\nnotify { 'app': consume => Sql['db'] }",
    )
    .unwrap_err();
    let Error::Catalog(catalog::Error::Validation(validation)) = &err else {
        panic!("expected a validation error, got {err}");
    };
    assert_eq!(validation.kind, ValidationKind::CapabilityMismatch);
    assert!(validation.message.contains("Sql[db]"));
}

#[test]
fn test_exported_capability_satisfies_consumer() {
    let catalog = compile_code(
        "sql { 'db': host => 'db1' }\n\
         notify { 'producer': export => Sql['db'] }\n\
         notify { 'consumer': consume => Sql['db'] }",
    )
    .unwrap();
    assert_eq!(managed(&catalog, "notify"), vec!["producer", "consumer"]);
}

#[test]
fn test_consumer_and_exporter_on_different_nodes() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("site.pp"),
        "sql { 'db': host => 'db1' }\n\
         node 'db1' { notify { 'db': export => Sql['db'] } }\n\
         node 'app1' { notify { 'app': consume => Sql['db'] } }\n",
    )
    .unwrap();
    let env = Environment::new("production").with_manifest(dir.path().join("site.pp"));
    let service = CompileService::new(env, Arc::new(types()));

    let results = service.compile_many(&[
        CompileRequest::new("db1", HashMap::new()),
        CompileRequest::new("app1", HashMap::new()),
    ]);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(service.cache().len(), 1);

    // Alone, the consumer has nobody exporting its capability
    assert!(service.compile("app1", &HashMap::new()).is_err());
}

#[test]
fn test_chained_cycle_is_reported() {
    let err = compile_code(
        "notify { 'A': }\nnotify { 'B': }\nnotify { 'C': }\n\
         Notify['A'] -> Notify['B'] -> Notify['C'] -> Notify['A']",
    )
    .unwrap_err();
    assert!(
        err.to_string()
            .contains("(Notify[A] => Notify[B] => Notify[C] => Notify[A])")
    );
}

#[test]
fn test_function_misuse_is_fatal() {
    assert!(matches!(
        compile_code("nosuch()").unwrap_err(),
        Error::UnknownFunction { .. }
    ));
    assert!(matches!(
        compile_code("$v = notice('x')").unwrap_err(),
        Error::FunctionContext { .. }
    ));
}

#[test]
fn test_include_is_idempotent_across_the_node() {
    let catalog = compile_code(
        "class base { notify { 'base': } }\n\
         class web { include base }\n\
         class db { include base }\n\
         node default { include web, db, base }",
    )
    .unwrap();
    assert_eq!(managed(&catalog, "notify"), vec!["base"]);
    assert_eq!(catalog.classes, vec!["web", "base", "db"]);
}

#[test]
fn test_virtual_resources_need_realizing() {
    let catalog = compile_code(
        "@notify { 'kept': }\n@notify { 'dropped': }\n@@notify { 'shipped': }\nrealize(Notify['kept'])",
    )
    .unwrap();
    assert_eq!(managed(&catalog, "notify"), vec!["kept"]);
    let shipped = catalog.resource(&ResourceRef::new("notify", "shipped")).unwrap();
    assert_eq!(shipped.origin, Origin::Exported);
}

#[test]
fn test_modules_autoload_from_modulepath() {
    let dir = tempfile::tempdir().unwrap();
    let modules = dir.path().join("modules");
    fs::create_dir_all(modules.join("ssh/manifests")).unwrap();
    fs::write(
        modules.join("ssh/manifests/init.pp"),
        "class ssh($port = 22) { file { '/etc/ssh/sshd_config': content => \"Port ${port}\\n\" } }\n",
    )
    .unwrap();
    fs::write(dir.path().join("site.pp"), "node default { class { 'ssh': port => 2222 } }\n").unwrap();

    let env = Environment::new("production")
        .with_manifest(dir.path().join("site.pp"))
        .with_modulepath([modules]);
    let catalog = compile("web1", &HashMap::new(), &env, &types()).unwrap();
    let config = catalog
        .resource(&ResourceRef::new("file", "/etc/ssh/sshd_config"))
        .unwrap();
    assert_eq!(config.get_str("content"), Some("Port 2222\n"));
}

#[test]
fn test_catalog_serializes_to_json() {
    let catalog = compile_code("notify { 'hello': message => 'world' }").unwrap();
    let json: serde_json::Value = serde_json::from_str(&catalog.to_json().unwrap()).unwrap();
    assert_eq!(json["name"], "web1");
    assert_eq!(json["environment"], "production");
}
