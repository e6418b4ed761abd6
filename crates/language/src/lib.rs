//! Puppet manifest front end
//!
//! Source text goes through the [`lexer`] and [`parser`] into an AST, and
//! the [`evaluator`] walks that AST for one node, declaring resources into
//! a [`catalog::Catalog`]. [`compile`] wires the steps together with
//! validation and finalization; [`CompileService`] compiles many nodes of
//! one environment in parallel over a shared manifest cache.
//!
//! # Example
//!
//! ```
//! use catalog::{ResourceRef, ResourceType, TypeRegistry};
//! use language::{Environment, compile};
//! use std::collections::HashMap;
//!
//! let mut types = TypeRegistry::new();
//! types.register(ResourceType::builtin("notify").property("message"));
//!
//! let env = Environment::new("production").with_code(
//!     "site.pp",
//!     "class x($y, $z = '2') { notify { \"${y}-${z}\": } }\nclass { 'x': y => '1' }",
//! );
//! let catalog = compile("web1", &HashMap::new(), &env, &types)?;
//! assert!(catalog.resource(&ResourceRef::new("notify", "1-2")).is_some());
//! # Ok::<(), language::Error>(())
//! ```

pub mod ast;
pub mod compiler;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod scope;
pub mod service;

pub use compiler::{Compiler, compile};
pub use error::{Error, Result};
pub use evaluator::Evaluator;
pub use functions::{CallContext, Function, FunctionImpl, FunctionKind, FunctionRegistry};
pub use loader::{Environment, Loader, ManifestCache, ManifestSource, manifest_files};
pub use parser::{parse_file, parse_str};
pub use service::{CompileRequest, CompileService};
