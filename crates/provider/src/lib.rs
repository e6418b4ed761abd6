//! Provider registry and confinement
//!
//! Every resource type is implemented by one or more [`Provider`]s, each
//! restricted to the hosts where it can work by a set of [`Confine`]s. At
//! apply time the [`ProviderRegistry`] picks exactly one suitable provider
//! per type for the current [`Host`], or explains why none fits.
//!
//! ```
//! use provider::{Confine, Host, ProviderEntry, ProviderRegistry, Provider, State};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! struct Apt;
//! impl Provider for Apt {
//!     fn retrieve(&self, _r: &catalog::Resource) -> anyhow::Result<State> { Ok(State::new()) }
//!     fn sync(&self, _r: &catalog::Resource, _p: &str, _v: &catalog::Value) -> anyhow::Result<()> { Ok(()) }
//! }
//!
//! let mut registry = ProviderRegistry::new();
//! registry.register(
//!     ProviderEntry::new("package", "apt", Arc::new(Apt))
//!         .confine(Confine::variable("osfamily", &["debian"])),
//! );
//!
//! let host = Host::from_facts(HashMap::from([("osfamily".into(), "Debian".into())]));
//! assert_eq!(registry.select("package", &host)?.name, "apt");
//! # Ok::<(), provider::Error>(())
//! ```

pub mod confine;
pub mod error;
pub mod facts;
pub mod host;
pub mod provider;
pub mod registry;

pub use confine::{Condition, Confine, ConfineSet};
pub use error::{Error, Result};
pub use facts::{FactCache, FactSource, StaticFacts};
pub use host::{FeatureSet, Host};
pub use provider::{Provider, State, change_message, values_match};
pub use registry::{DefaultFor, ProviderEntry, ProviderRegistry};
