//! Module registry collaborator.
//!
//! The sandbox runtime behind the registry is opaque: run a module with
//! a request, get output bytes or a [`RunErr`] back.

use std::collections::HashMap;

use async_trait::async_trait;

use super::RunErr;
use crate::request::CoordinatedRequest;

/// Local execution capability of one node.
#[async_trait]
pub trait ModuleRegistry: Send + Sync {
    /// Can this node execute the named module?
    fn can_run(&self, fqfn: &str) -> bool;

    /// Execute the module. `Ok(None)` means the module produced no
    /// output, which is a legitimate outcome rather than an error.
    async fn invoke(
        &self,
        fqfn: &str,
        req: &CoordinatedRequest,
    ) -> Result<Option<Vec<u8>>, RunErr>;
}

type ModuleFn =
    dyn Fn(&CoordinatedRequest) -> Result<Option<Vec<u8>>, RunErr> + Send + Sync;

/// Registry over a fixed set of in-process functions.
///
/// Stands in for a real sandbox runtime in tests and embedded setups;
/// the set of runnable modules is fixed at construction, matching the
/// read-mostly registry contract.
#[derive(Default)]
pub struct StaticRegistry {
    modules: HashMap<String, Box<ModuleFn>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under an FQFN.
    pub fn with_module(
        mut self,
        fqfn: impl Into<String>,
        module: impl Fn(&CoordinatedRequest) -> Result<Option<Vec<u8>>, RunErr>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.modules.insert(fqfn.into(), Box::new(module));
        self
    }
}

#[async_trait]
impl ModuleRegistry for StaticRegistry {
    fn can_run(&self, fqfn: &str) -> bool {
        self.modules.contains_key(fqfn)
    }

    async fn invoke(
        &self,
        fqfn: &str,
        req: &CoordinatedRequest,
    ) -> Result<Option<Vec<u8>>, RunErr> {
        match self.modules.get(fqfn) {
            Some(module) => module(req),
            // Reached only if callers skip the can_run gate.
            None => Err(RunErr::new(404, format!("module not loaded: {fqfn}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registered_module_is_runnable() {
        let registry = StaticRegistry::new()
            .with_module("ns.fn", |_req| Ok(Some(b"out".to_vec())));

        assert!(registry.can_run("ns.fn"));
        assert!(!registry.can_run("ns.other"));

        let req = CoordinatedRequest::default();
        assert_eq!(
            registry.invoke("ns.fn", &req).await.unwrap(),
            Some(b"out".to_vec())
        );
    }

    #[tokio::test]
    async fn test_module_run_err_propagates() {
        let registry = StaticRegistry::new()
            .with_module("ns.fails", |_req| Err(RunErr::new(500, "boom")));

        let req = CoordinatedRequest::default();
        let err = registry.invoke("ns.fails", &req).await.unwrap_err();

        assert_eq!(err.code, 500);
    }
}
