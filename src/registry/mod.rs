//! The function catalog: value functions, statements and compile-time
//! transforms, grouped into packages.

mod entry;
mod stdlib;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

pub use entry::{
    ArgSpec, ArgType, AsyncFunction, CallTransform, CustomTransform, FunctionEntry, FunctionKind,
    FunctionOptions, FunctionSummary, StatementFunction, StatementFuture, SyncFunction,
    ValueFuture,
};
pub use stdlib::LOG_STATEMENTS;

use crate::compile::CompileState;
use crate::execute::FunctionContext;
use crate::types::{Ast, CallNode, CompileError, CustomNode, FunctionError, RegistryError, Value};

/// Names starting with this prefix are hidden from [`FunctionRegistry::list_functions`].
pub const RESERVED_PREFIX: &str = "_";

type FunctionKey = (Option<String>, String);

#[derive(Debug, Default)]
struct Catalog {
    entries: DashMap<FunctionKey, Arc<FunctionEntry>>,
    config: DashMap<String, JsonValue>,
    sealed: AtomicBool,
}

/// Registry of callable behavior, shared between a root view and any number
/// of package views created with [`create_package_instance`](Self::create_package_instance).
///
/// Registration happens during setup. Compiling a program seals the catalog,
/// after which it is read-only and can be shared freely across executions.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    catalog: Arc<Catalog>,
    package: Option<String>,
    merged_config: OnceLock<Map<String, JsonValue>>,
}

pub type RegisterHook = Arc<dyn Fn(&FunctionRegistry) -> Result<(), RegistryError> + Send + Sync>;

/// A loadable extension. Importing it runs its register hook against a
/// package-scoped registry view.
#[derive(Clone, Default)]
pub struct PackageModule {
    register: Option<RegisterHook>,
}

impl PackageModule {
    /// A module without a register entry point.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_register<F>(register: F) -> Self
    where
        F: Fn(&FunctionRegistry) -> Result<(), RegistryError> + Send + Sync + 'static,
    {
        Self {
            register: Some(Arc::new(register)),
        }
    }

    #[must_use]
    pub fn exposes_register(&self) -> bool {
        self.register.is_some()
    }
}

impl fmt::Debug for PackageModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageModule")
            .field("register", &self.register.is_some())
            .finish()
    }
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the standard library.
    ///
    /// # Errors
    ///
    /// Fails only if the standard library registers a name twice.
    pub fn with_stdlib() -> Result<Self, RegistryError> {
        let registry = Self::new();
        stdlib::register(&registry)?;
        Ok(registry)
    }

    /// Seed the shared base configuration from a JSON object. Non-object
    /// values are ignored.
    #[must_use]
    pub fn with_config(self, config: JsonValue) -> Self {
        if let JsonValue::Object(map) = config {
            for (key, value) in map {
                self.catalog.config.insert(key, value);
            }
        }
        self
    }

    /// The package this view registers into, if any.
    #[must_use]
    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    /// Register a value function that may suspend.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateFunction`] if `name` already exists in this
    /// namespace, [`RegistryError::Sealed`] after compilation.
    pub fn register<F, Fut>(
        &self,
        name: &str,
        func: F,
        options: FunctionOptions,
    ) -> Result<(), RegistryError>
    where
        F: Fn(FunctionContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FunctionError>> + Send + 'static,
    {
        let func: AsyncFunction =
            Arc::new(move |ctx: FunctionContext, args: Vec<Value>| -> ValueFuture {
                Box::pin(func(ctx, args))
            });
        self.insert(name, FunctionKind::Async(func), options)
    }

    /// Register a value function that completes immediately.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn register_sync<F>(
        &self,
        name: &str,
        func: F,
        options: FunctionOptions,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&FunctionContext, &[Value]) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        self.insert(name, FunctionKind::Sync(Arc::new(func)), options)
    }

    /// Register a statement attached to the statement feature `feature`.
    /// Statement functions route their effects through the execution's
    /// manipulator.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn register_statement<F, Fut>(
        &self,
        feature: &str,
        name: &str,
        func: F,
        options: FunctionOptions,
    ) -> Result<(), RegistryError>
    where
        F: Fn(FunctionContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FunctionError>> + Send + 'static,
    {
        let func: StatementFunction =
            Arc::new(move |ctx: FunctionContext, args: Vec<Value>| -> StatementFuture {
                Box::pin(func(ctx, args))
            });
        self.insert(
            name,
            FunctionKind::Statement {
                feature: feature.to_owned(),
                func,
            },
            options,
        )
    }

    /// Register a compile-time hook for custom call syntax.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnnamedTransform`] if `name` is empty, otherwise as
    /// [`register`](Self::register).
    pub fn register_custom<F>(
        &self,
        name: &str,
        transform: F,
        options: FunctionOptions,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&CustomNode, &mut CompileState) -> Result<Ast, CompileError> + Send + Sync + 'static,
    {
        if name.trim().is_empty() {
            return Err(RegistryError::UnnamedTransform);
        }
        self.insert(name, FunctionKind::Custom(Arc::new(transform)), options)
    }

    /// Register a compile-time rewrite of normal call sites named `name`.
    ///
    /// # Errors
    ///
    /// Same as [`register_custom`](Self::register_custom).
    pub fn register_transform<F>(
        &self,
        name: &str,
        transform: F,
        options: FunctionOptions,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&CallNode) -> Result<Ast, CompileError> + Send + Sync + 'static,
    {
        if name.trim().is_empty() {
            return Err(RegistryError::UnnamedTransform);
        }
        self.insert(name, FunctionKind::Transform(Arc::new(transform)), options)
    }

    /// A view of the same catalog whose registrations are tagged with
    /// `name`. Namespacing is one level deep.
    ///
    /// # Errors
    ///
    /// [`RegistryError::AlreadyNamespaced`] when called on a package view.
    pub fn create_package_instance(&self, name: &str) -> Result<Self, RegistryError> {
        if let Some(package) = &self.package {
            return Err(RegistryError::AlreadyNamespaced {
                package: package.clone(),
            });
        }
        Ok(Self {
            catalog: Arc::clone(&self.catalog),
            package: Some(name.to_owned()),
            merged_config: OnceLock::new(),
        })
    }

    /// Load an extension package: run its register hook with a view
    /// namespaced to `name`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidPackage`] when the module has no register
    /// hook; any error the hook returns.
    pub fn import_from_package(
        &self,
        name: &str,
        module: &PackageModule,
    ) -> Result<(), RegistryError> {
        let Some(register) = &module.register else {
            return Err(RegistryError::InvalidPackage {
                name: name.to_owned(),
            });
        };
        let view = self.create_package_instance(name)?;
        register(&view)?;
        debug!(package = name, "imported package");
        Ok(())
    }

    /// Set a key of the shared base configuration.
    pub fn set_config(&self, key: &str, value: JsonValue) {
        self.catalog.config.insert(key.to_owned(), value);
    }

    /// The base configuration overlaid with this namespace's override block
    /// (the base entry keyed by the package name).
    ///
    /// Computed on first access and cached for the lifetime of this registry
    /// instance: later changes to the base configuration are not observed.
    pub fn config(&self) -> &Map<String, JsonValue> {
        self.merged_config.get_or_init(|| {
            let mut merged: Map<String, JsonValue> = self
                .catalog
                .config
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect();
            let overrides = self
                .package
                .as_ref()
                .and_then(|package| self.catalog.config.get(package).map(|e| e.value().clone()));
            if let Some(JsonValue::Object(overrides)) = overrides {
                merged.extend(overrides);
            }
            merged
        })
    }

    /// Public catalog listing, excluding names with the reserved prefix.
    #[must_use]
    pub fn list_functions(&self) -> Vec<FunctionSummary> {
        let mut summaries: Vec<FunctionSummary> = self
            .catalog
            .entries
            .iter()
            .filter(|e| !e.value().name.starts_with(RESERVED_PREFIX))
            .map(|e| e.value().summary())
            .collect();
        summaries.sort_by(|a, b| (&a.name, &a.package).cmp(&(&b.name, &b.package)));
        summaries
    }

    /// Resolve a function name the way a call site sees it.
    ///
    /// `package.name` selects a package entry. A bare name resolves to this
    /// view's own package first, then the root namespace, then the single
    /// package that defines it.
    ///
    /// # Errors
    ///
    /// [`CompileError::UnknownFunction`] or [`CompileError::AmbiguousFunction`].
    pub fn lookup(&self, name: &str) -> Result<Arc<FunctionEntry>, CompileError> {
        let unknown = || CompileError::UnknownFunction {
            name: name.to_owned(),
        };

        if let Some((package, func)) = name.split_once('.') {
            return self.entry(Some(package), func).ok_or_else(unknown);
        }
        if let Some(entry) = self.package().and_then(|p| self.entry(Some(p), name)) {
            return Ok(entry);
        }
        if let Some(entry) = self.entry(None, name) {
            return Ok(entry);
        }

        let mut candidates: Vec<Arc<FunctionEntry>> = self
            .catalog
            .entries
            .iter()
            .filter(|e| e.key().1 == name)
            .map(|e| Arc::clone(e.value()))
            .collect();
        match candidates.len() {
            0 => Err(unknown()),
            1 => Ok(candidates.remove(0)),
            _ => {
                let mut packages: Vec<String> =
                    candidates.iter().filter_map(|e| e.package.clone()).collect();
                packages.sort();
                Err(CompileError::AmbiguousFunction {
                    name: name.to_owned(),
                    packages,
                })
            }
        }
    }

    /// [`lookup`](Self::lookup) without the error detail.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<FunctionEntry>> {
        self.lookup(name).ok()
    }

    /// Make the catalog read-only. Idempotent.
    pub fn seal(&self) {
        if !self.catalog.sealed.swap(true, Ordering::AcqRel) {
            debug!(functions = self.catalog.entries.len(), "function registry sealed");
        }
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.catalog.sealed.load(Ordering::Acquire)
    }

    /// Number of entries across all namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.catalog.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.catalog.entries.is_empty()
    }

    fn entry(&self, package: Option<&str>, name: &str) -> Option<Arc<FunctionEntry>> {
        self.catalog
            .entries
            .get(&(package.map(str::to_owned), name.to_owned()))
            .map(|e| Arc::clone(e.value()))
    }

    fn insert(
        &self,
        name: &str,
        kind: FunctionKind,
        options: FunctionOptions,
    ) -> Result<(), RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::UnnamedFunction);
        }
        if self.is_sealed() {
            return Err(RegistryError::Sealed {
                name: name.to_owned(),
            });
        }

        match self
            .catalog
            .entries
            .entry((self.package.clone(), name.to_owned()))
        {
            Entry::Occupied(_) => Err(RegistryError::DuplicateFunction {
                name: name.to_owned(),
                package: self.package.clone(),
            }),
            Entry::Vacant(vacant) => {
                let entry = FunctionEntry::new(name, self.package.as_deref(), kind, options);
                debug!(
                    function = name,
                    package = self.package.as_deref().unwrap_or(""),
                    kind = ?entry.kind,
                    "registered function"
                );
                vacant.insert(Arc::new(entry));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{call, constant};

    fn identity() -> impl Fn(&FunctionContext, &[Value]) -> Result<Value, FunctionError> {
        |_, args| Ok(args.first().cloned().unwrap_or_default())
    }

    #[test]
    fn register_and_lookup() {
        let registry = FunctionRegistry::new();
        registry
            .register_sync("identity", identity(), FunctionOptions::new().pure())
            .unwrap();
        let entry = registry.lookup("identity").unwrap();
        assert_eq!(entry.name, "identity");
        assert!(entry.pure);
        assert!(!entry.is_async());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn async_registration_is_marked_async() {
        let registry = FunctionRegistry::new();
        registry
            .register("fetch", |_, _| async { Ok(Value::Null) }, FunctionOptions::new())
            .unwrap();
        assert!(registry.lookup("fetch").unwrap().is_async());
    }

    #[test]
    fn duplicate_in_same_namespace_fails() {
        let registry = FunctionRegistry::new();
        registry
            .register_sync("f", identity(), FunctionOptions::new())
            .unwrap();
        let err = registry
            .register_sync("f", identity(), FunctionOptions::new())
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateFunction {
                name: "f".into(),
                package: None,
            }
        );
    }

    #[test]
    fn same_name_in_different_namespaces_succeeds() {
        let registry = FunctionRegistry::new();
        registry
            .register_sync("f", identity(), FunctionOptions::new())
            .unwrap();
        let pkg = registry.create_package_instance("pkgA").unwrap();
        pkg.register_sync("f", identity(), FunctionOptions::new())
            .unwrap();

        assert_eq!(registry.lookup("f").unwrap().package, None);
        assert_eq!(pkg.lookup("f").unwrap().package.as_deref(), Some("pkgA"));
        assert_eq!(
            registry.lookup("pkgA.f").unwrap().package.as_deref(),
            Some("pkgA")
        );
    }

    #[test]
    fn bare_name_in_two_packages_is_ambiguous() {
        let registry = FunctionRegistry::new();
        for package in ["b", "a"] {
            registry
                .create_package_instance(package)
                .unwrap()
                .register_sync("f", identity(), FunctionOptions::new())
                .unwrap();
        }
        assert_eq!(
            registry.lookup("f").unwrap_err(),
            CompileError::AmbiguousFunction {
                name: "f".into(),
                packages: vec!["a".into(), "b".into()],
            }
        );
    }

    #[test]
    fn nested_namespacing_fails() {
        let pkg = FunctionRegistry::new().create_package_instance("a").unwrap();
        assert_eq!(
            pkg.create_package_instance("b").unwrap_err(),
            RegistryError::AlreadyNamespaced {
                package: "a".into()
            }
        );
    }

    #[test]
    fn unnamed_transform_rejected() {
        let registry = FunctionRegistry::new();
        let err = registry
            .register_transform("", |c: &CallNode| Ok(Ast::Call(c.clone())), FunctionOptions::new())
            .unwrap_err();
        assert_eq!(err, RegistryError::UnnamedTransform);

        let err = registry
            .register_custom(" ", |_: &CustomNode, _: &mut CompileState| Ok(constant(1_i64)), FunctionOptions::new())
            .unwrap_err();
        assert_eq!(err, RegistryError::UnnamedTransform);
    }

    #[test]
    fn sealed_registry_rejects_registration() {
        let registry = FunctionRegistry::new();
        registry.seal();
        assert!(registry.is_sealed());
        let err = registry
            .register_sync("late", identity(), FunctionOptions::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::Sealed { name } if name == "late"));
    }

    #[test]
    fn import_requires_register_hook() {
        let registry = FunctionRegistry::new();
        let err = registry
            .import_from_package("empty", &PackageModule::new())
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::InvalidPackage {
                name: "empty".into()
            }
        );

        let module = PackageModule::with_register(|view| {
            assert_eq!(view.package(), Some("strings"));
            view.register_sync("upper", |_, args| {
                Ok(Value::from(args[0].to_plain_string().to_uppercase()))
            }, FunctionOptions::new())
        });
        registry.import_from_package("strings", &module).unwrap();
        assert_eq!(
            registry.lookup("upper").unwrap().package.as_deref(),
            Some("strings")
        );
    }

    #[test]
    fn config_is_merged_and_cached() {
        let registry = FunctionRegistry::new().with_config(serde_json::json!({
            "region": "us",
            "limit": 10,
            "pkgA": { "limit": 20 },
        }));
        let pkg = registry.create_package_instance("pkgA").unwrap();

        let first = pkg.config().clone();
        assert_eq!(first["limit"], serde_json::json!(20));
        assert_eq!(first["region"], serde_json::json!("us"));

        registry.set_config("region", serde_json::json!("eu"));
        assert_eq!(pkg.config(), &first);

        let fresh = registry.create_package_instance("pkgA").unwrap();
        assert_eq!(fresh.config()["region"], serde_json::json!("eu"));
    }

    #[test]
    fn list_functions_hides_reserved_names() {
        let registry = FunctionRegistry::new();
        registry
            .register_sync("_internalHelper", identity(), FunctionOptions::new())
            .unwrap();
        registry
            .register_sync(
                "visible",
                identity(),
                FunctionOptions::new().argstring("value").docstring("Returns its argument"),
            )
            .unwrap();
        let listing = registry.list_functions();
        assert_eq!(
            listing,
            vec![FunctionSummary {
                name: "visible".into(),
                argstring: "value".into(),
                docstring: "Returns its argument".into(),
                package: None,
            }]
        );
    }

    #[test]
    fn empty_registry_lists_nothing() {
        assert!(FunctionRegistry::new().list_functions().is_empty());
    }

    #[test]
    fn transforms_are_tagged() {
        let registry = FunctionRegistry::new();
        registry
            .register_transform(
                "sugar",
                |_: &CallNode| Ok(call("identity", vec![constant(1_i64)])),
                FunctionOptions::new(),
            )
            .unwrap();
        let entry = registry.lookup("sugar").unwrap();
        assert!(matches!(entry.kind, FunctionKind::Transform(_)));
    }
}
