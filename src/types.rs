//! Built-in resource types

use catalog::{Catalog, Resource, ResourceRef, ResourceType, TypeRegistry};
use std::path::Path;

/// `notify`, `file`, `exec`, `package` and `service`, plus one capability type per
/// configured name
pub fn builtin_types(capability_types: &[String]) -> TypeRegistry {
    let mut types = TypeRegistry::new();
    types.register(
        ResourceType::builtin("notify")
            .namevar("message")
            .property("message")
            .parameter("withpath"),
    );
    types.register(
        ResourceType::builtin("file")
            .namevar("path")
            .property("ensure")
            .property("content")
            .property("mode")
            .autorequire(file_parent),
    );
    types.register(
        ResourceType::builtin("exec")
            .namevar("command")
            .property("command")
            .parameter("refreshonly")
            .parameter("creates")
            .parameter("cwd")
            .parameter("tries")
            .parameter("try_sleep")
            .parameter("onlyif")
            .parameter("unless")
            .parameter("returns")
            .parameter("timeout")
            .parameter("path")
            .parameter("environment")
            .autorequire(exec_cwd),
    );
    types.register(
        ResourceType::builtin("package")
            .namevar("name")
            .property("ensure")
            .parameter("source"),
    );
    types.register(
        ResourceType::builtin("service")
            .property("ensure")
            .property("enable")
            .parameter("start")
            .parameter("stop")
            .parameter("restart"),
    );
    for name in capability_types {
        types.register(ResourceType::capability(name));
    }
    types
}

fn managed_file(catalog: &Catalog, path: &str) -> Option<ResourceRef> {
    let reference = ResourceRef::new("file", path);
    catalog.id_of(&reference).map(|_| reference)
}

/// The nearest ancestor directory managed in the same catalog
fn file_parent(resource: &Resource, catalog: &Catalog) -> Vec<ResourceRef> {
    let path = resource.get_str("path").unwrap_or_else(|| resource.title());
    Path::new(path)
        .ancestors()
        .skip(1)
        .filter_map(|ancestor| ancestor.to_str())
        .filter(|ancestor| !ancestor.is_empty())
        .find_map(|ancestor| managed_file(catalog, ancestor))
        .into_iter()
        .collect()
}

fn exec_cwd(resource: &Resource, catalog: &Catalog) -> Vec<ResourceRef> {
    resource
        .get_str("cwd")
        .and_then(|cwd| managed_file(catalog, cwd))
        .into_iter()
        .collect()
}
