use crate::worker_api::config::FunctionLimits;
use anyhow::Result;
use hearth_library::transaction::TransactionId;
use hearth_library::types::Language;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// A registered function, ready to be executed on request.
/// Read-only to the execution core.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FunctionSpec {
    pub id: u32,
    pub name: String,
    /// kept as the raw registered string; the dispatcher validates it
    /// against the supported set on every invocation
    pub language: String,
    pub code: String,
    pub timeout_sec: u64,
}

fn default_timeout() -> u64 {
    5
}

#[derive(Debug, serde::Deserialize)]
/// Create/update payload for a function.
pub struct FunctionRequest {
    pub name: String,
    pub language: String,
    pub code: String,
    #[serde(default = "default_timeout")]
    pub timeout_sec: u64,
}

#[derive(Debug)]
pub struct FunctionNotFoundError {
    pub function_id: u32,
}
impl FunctionNotFoundError {
    pub fn boxed(function_id: u32) -> anyhow::Error {
        anyhow::Error::new(FunctionNotFoundError { function_id })
    }
}
impl Display for FunctionNotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "Function '{}' was not found", self.function_id)?;
        Ok(())
    }
}
impl std::error::Error for FunctionNotFoundError {}

/// In-memory store of registered functions.
pub struct RegistrationService {
    functions: RwLock<HashMap<u32, Arc<FunctionSpec>>>,
    next_id: AtomicU32,
    limits: Arc<FunctionLimits>,
}

impl RegistrationService {
    pub fn new(limits: Arc<FunctionLimits>) -> Arc<Self> {
        Arc::new(RegistrationService {
            functions: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            limits,
        })
    }

    fn validate(&self, request: &FunctionRequest, tid: &TransactionId) -> Result<()> {
        if request.name.is_empty() {
            anyhow::bail!("Invalid function name");
        }
        if request.code.is_empty() {
            anyhow::bail!("Function code cannot be empty");
        }
        if request.timeout_sec == 0 || request.timeout_sec > self.limits.timeout_sec {
            anyhow::bail!(
                "Illegal timeout request '{}', must be within [1, {}]",
                request.timeout_sec,
                self.limits.timeout_sec
            );
        }
        if Language::from_str(&request.language).is_err() {
            // registration is permissive here, execution will reject it
            warn!(tid=tid, language=%request.language, "Registering function with unsupported language");
        }
        Ok(())
    }

    pub fn register(&self, request: FunctionRequest, tid: &TransactionId) -> Result<Arc<FunctionSpec>> {
        self.validate(&request, tid)?;
        let mut map = self.functions.write();
        if map.values().any(|f| f.name == request.name) {
            anyhow::bail!("Function '{}' already exists", request.name);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let spec = Arc::new(FunctionSpec {
            id,
            name: request.name,
            language: request.language,
            code: request.code,
            timeout_sec: request.timeout_sec,
        });
        map.insert(id, spec.clone());
        info!(tid=tid, function_id=id, function_name=%spec.name, language=%spec.language, "Function registered");
        Ok(spec)
    }

    pub fn get_function(&self, function_id: u32) -> Option<Arc<FunctionSpec>> {
        self.functions.read().get(&function_id).cloned()
    }

    pub fn list_functions(&self) -> Vec<Arc<FunctionSpec>> {
        let mut ret: Vec<Arc<FunctionSpec>> = self.functions.read().values().cloned().collect();
        ret.sort_by_key(|f| f.id);
        ret
    }

    pub fn update_function(
        &self,
        function_id: u32,
        request: FunctionRequest,
        tid: &TransactionId,
    ) -> Result<Arc<FunctionSpec>> {
        self.validate(&request, tid)?;
        let mut map = self.functions.write();
        if !map.contains_key(&function_id) {
            return Err(FunctionNotFoundError::boxed(function_id));
        }
        if map.values().any(|f| f.name == request.name && f.id != function_id) {
            anyhow::bail!("Function '{}' already exists", request.name);
        }
        let spec = Arc::new(FunctionSpec {
            id: function_id,
            name: request.name,
            language: request.language,
            code: request.code,
            timeout_sec: request.timeout_sec,
        });
        map.insert(function_id, spec.clone());
        info!(tid=tid, function_id=function_id, function_name=%spec.name, "Function updated");
        Ok(spec)
    }

    pub fn remove_function(&self, function_id: u32, tid: &TransactionId) -> Result<()> {
        match self.functions.write().remove(&function_id) {
            Some(f) => {
                info!(tid=tid, function_id=function_id, function_name=%f.name, "Function removed");
                Ok(())
            },
            None => Err(FunctionNotFoundError::boxed(function_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_library::transaction::gen_tid;

    fn service() -> Arc<RegistrationService> {
        RegistrationService::new(Arc::new(FunctionLimits { timeout_sec: 300 }))
    }

    fn request(name: &str) -> FunctionRequest {
        FunctionRequest {
            name: name.to_string(),
            language: "python".to_string(),
            code: "print('hi')".to_string(),
            timeout_sec: 5,
        }
    }

    #[test]
    fn register_and_get() {
        let reg = service();
        let spec = reg.register(request("hello"), &gen_tid()).unwrap();
        assert_eq!(spec.id, 1);
        let fetched = reg.get_function(spec.id).unwrap();
        assert_eq!(fetched.name, "hello");
        assert!(reg.get_function(99).is_none());
    }

    #[test]
    fn duplicate_names_rejected() {
        let reg = service();
        reg.register(request("hello"), &gen_tid()).unwrap();
        assert!(reg.register(request("hello"), &gen_tid()).is_err());
    }

    #[test]
    fn timeout_limit_enforced() {
        let reg = service();
        let mut req = request("hello");
        req.timeout_sec = 301;
        assert!(reg.register(req, &gen_tid()).is_err());
        let mut req = request("hello");
        req.timeout_sec = 0;
        assert!(reg.register(req, &gen_tid()).is_err());
    }

    #[test]
    fn update_missing_is_not_found() {
        let reg = service();
        let err = reg.update_function(12, request("hello"), &gen_tid()).unwrap_err();
        assert!(err.downcast_ref::<FunctionNotFoundError>().is_some());
    }

    #[test]
    fn update_and_remove() {
        let reg = service();
        let tid = gen_tid();
        let spec = reg.register(request("hello"), &tid).unwrap();
        let mut req = request("hello2");
        req.code = "print('bye')".to_string();
        let updated = reg.update_function(spec.id, req, &tid).unwrap();
        assert_eq!(updated.id, spec.id);
        assert_eq!(updated.code, "print('bye')");
        reg.remove_function(spec.id, &tid).unwrap();
        let err = reg.remove_function(spec.id, &tid).unwrap_err();
        assert!(err.downcast_ref::<FunctionNotFoundError>().is_some());
    }

    #[test]
    fn list_is_ordered() {
        let reg = service();
        let tid = gen_tid();
        reg.register(request("a"), &tid).unwrap();
        reg.register(request("b"), &tid).unwrap();
        reg.register(request("c"), &tid).unwrap();
        let ids: Vec<u32> = reg.list_functions().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
