//! Step emitter registry.
//!
//! Maps each step kind (and, for reads and writes, each endpoint kind) to an
//! emitter that turns a step descriptor into a [`Fragment`]. Registries are
//! plain values built once per compiler, so tests can swap emitters and new
//! step kinds can be added without touching the compiler.
//!
//! ```
//! use pipewright::pipeline::{Descriptor, EmitContext, EmitterKey, EmitterRegistry, StepEmitter};
//! use pipewright::pipeline::fragment::{Fragment, Statement};
//!
//! struct Dedupe;
//!
//! impl StepEmitter for Dedupe {
//!     fn emit(
//!         &self,
//!         _descriptor: &Descriptor<'_>,
//!         _ctx: &EmitContext<'_>,
//!     ) -> pipewright::error::Result<Fragment> {
//!         Ok(Fragment::single(
//!             Statement::new().dataset().text(" = ").dataset().text(".unique(maintain_order=True)"),
//!         ))
//!     }
//! }
//!
//! let mut registry = EmitterRegistry::polars();
//! registry.register(EmitterKey::transform("dedupe"), Dedupe);
//! assert!(registry.supports(&EmitterKey::transform("dedupe")));
//! ```

use super::fragment::Fragment;
use super::polars;
use super::spec::{Endpoint, Params, Transform};
use crate::error::{EndpointRole, PipelineError, Result, StepLocation};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Registry lookup key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum EmitterKey {
    Read(String),
    Write(String),
    Transform(String),
    Merge,
}

impl EmitterKey {
    pub fn read(kind: impl Into<String>) -> Self {
        Self::Read(kind.into())
    }

    pub fn write(kind: impl Into<String>) -> Self {
        Self::Write(kind.into())
    }

    pub fn transform(kind: impl Into<String>) -> Self {
        Self::Transform(kind.into())
    }
}

/// What an emitter is asked to emit.
///
/// Fragments refer to the dataset they operate on through
/// [`super::fragment::Segment::Dataset`]; the caller binds it.
#[derive(Debug, Clone, Copy)]
pub enum Descriptor<'a> {
    Read(&'a Endpoint),
    Write(&'a Endpoint),
    Transform(&'a Transform),
    Merge {
        params: &'a Params,
        /// Branch result identifiers, in merge order
        inputs: &'a [String],
    },
}

/// Ambient information available to an emitter.
pub struct EmitContext<'a> {
    pub location: &'a StepLocation,
    /// The registry the emitter was dispatched from, for composite steps
    pub registry: &'a EmitterRegistry,
}

/// Code emission capability for one step kind.
pub trait StepEmitter: Send + Sync {
    /// Emit the fragment for `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns an error when the step's parameters are missing or malformed.
    fn emit(&self, descriptor: &Descriptor<'_>, ctx: &EmitContext<'_>) -> Result<Fragment>;
}

#[derive(Clone, Default)]
pub struct EmitterRegistry {
    emitters: BTreeMap<EmitterKey, Arc<dyn StepEmitter>>,
}

impl EmitterRegistry {
    /// A registry with no emitters.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in polars emitters.
    pub fn polars() -> Self {
        let mut registry = Self::empty();
        polars::register_builtin(&mut registry);
        registry
    }

    /// Register (or replace) the emitter for `key`.
    pub fn register(
        &mut self,
        key: EmitterKey,
        emitter: impl StepEmitter + 'static,
    ) -> &mut Self {
        self.emitters.insert(key, Arc::new(emitter));
        self
    }

    /// Register one shared emitter under several keys (kind aliases).
    pub fn register_shared(
        &mut self,
        keys: impl IntoIterator<Item = EmitterKey>,
        emitter: Arc<dyn StepEmitter>,
    ) -> &mut Self {
        for key in keys {
            self.emitters.insert(key, Arc::clone(&emitter));
        }
        self
    }

    pub fn supports(&self, key: &EmitterKey) -> bool {
        self.emitters.contains_key(key)
    }

    /// Dispatch `descriptor` to its emitter.
    ///
    /// # Errors
    ///
    /// `UnknownStep` / `UnknownEndpoint` when no emitter is registered for the
    /// step or endpoint kind, or whatever the emitter itself reports.
    pub fn emit(&self, descriptor: &Descriptor<'_>, location: &StepLocation) -> Result<Fragment> {
        let key = key_for(descriptor);
        let Some(emitter) = self.emitters.get(&key) else {
            return Err(unsupported(&key, location));
        };
        let ctx = EmitContext {
            location,
            registry: self,
        };
        emitter.emit(descriptor, &ctx)
    }
}

impl fmt::Debug for EmitterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmitterRegistry")
            .field("keys", &self.emitters.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn key_for(descriptor: &Descriptor<'_>) -> EmitterKey {
    match descriptor {
        Descriptor::Read(endpoint) => EmitterKey::read(&endpoint.kind),
        Descriptor::Write(endpoint) => EmitterKey::write(&endpoint.kind),
        Descriptor::Transform(transform) => EmitterKey::transform(&transform.kind),
        Descriptor::Merge { .. } => EmitterKey::Merge,
    }
}

/// The error reported when no emitter handles `key`.
fn unsupported(key: &EmitterKey, location: &StepLocation) -> PipelineError {
    match key {
        EmitterKey::Read(kind) => PipelineError::UnknownEndpoint {
            kind: kind.clone(),
            role: EndpointRole::Source,
            location: location.clone(),
        },
        EmitterKey::Write(kind) => PipelineError::UnknownEndpoint {
            kind: kind.clone(),
            role: EndpointRole::Target,
            location: location.clone(),
        },
        EmitterKey::Transform(kind) => PipelineError::UnknownStep {
            kind: kind.clone(),
            location: location.clone(),
        },
        EmitterKey::Merge => PipelineError::UnknownStep {
            kind: "merge".to_owned(),
            location: location.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fragment::Statement;

    struct Fixed(&'static str);

    impl StepEmitter for Fixed {
        fn emit(&self, _descriptor: &Descriptor<'_>, _ctx: &EmitContext<'_>) -> Result<Fragment> {
            Ok(Fragment::single(Statement::new().text(self.0)))
        }
    }

    fn transform(kind: &str) -> Transform {
        Transform {
            kind: kind.to_owned(),
            params: Params::new(),
        }
    }

    #[test]
    fn test_builtin_keys() {
        let registry = EmitterRegistry::polars();
        for key in [
            EmitterKey::read("csv"),
            EmitterKey::read("database"),
            EmitterKey::read("mariadb"),
            EmitterKey::write("csv"),
            EmitterKey::write("database"),
            EmitterKey::transform("filter"),
            EmitterKey::transform("join"),
            EmitterKey::transform("group"),
            EmitterKey::Merge,
        ] {
            assert!(registry.supports(&key), "missing {key:?}");
        }
        assert!(!registry.supports(&EmitterKey::read("ftp")));
    }

    #[test]
    fn test_dispatch_unknown_step() {
        let registry = EmitterRegistry::empty();
        let step = transform("pivot");
        let err = registry
            .emit(&Descriptor::Transform(&step), &StepLocation::top(1))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownStep { ref kind, .. } if kind == "pivot"));
    }

    #[test]
    fn test_register_replaces_emitter() {
        let mut registry = EmitterRegistry::polars();
        registry.register(EmitterKey::transform("filter"), Fixed("pass"));

        let step = transform("filter");
        let fragment = registry
            .emit(&Descriptor::Transform(&step), &StepLocation::top(0))
            .unwrap();
        assert_eq!(fragment.render("df"), vec!["pass"]);
    }
}
