use super::structs::{Container, ContainerHandle, ContainerState, PoolKey, PoolUnavailableError};
use super::Engine;
use crate::worker_api::config::PoolConfig;
use anyhow::Result;
use dashmap::DashMap;
use hearth_library::transaction::TransactionId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fixed set of warm containers for one [PoolKey].
/// Selection is round-robin: the cursor advances on every acquisition so
/// each container receives traffic under sustained load.
pub struct WarmPool {
    containers: Vec<Container>,
    cursor: AtomicUsize,
}
impl WarmPool {
    pub fn new(containers: Vec<Container>) -> Result<Self> {
        if containers.is_empty() {
            anyhow::bail!("A warm pool must hold at least one container");
        }
        Ok(WarmPool {
            containers,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Take the next container in rotation.
    /// The cursor read and advance are one atomic step, so concurrent callers
    /// never observe the same cursor value.
    pub fn next(&self) -> Container {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.containers[i % self.containers.len()].clone()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
    pub fn containers(&self) -> &[Container] {
        &self.containers
    }
}

/// Owns every warm pool, keyed by (technology, language).
/// Keys whose reconciliation failed at startup are absent from the map and
/// every acquisition against them fails with [PoolUnavailableError].
pub struct PoolManager {
    pools: DashMap<PoolKey, Arc<WarmPool>>,
}

impl PoolManager {
    /// Build all configured pools, reconciling against containers that
    /// already exist on the engine. A failing key degrades instead of
    /// aborting startup, so an uninstalled runtime only disables its own pools.
    pub async fn initialize(engine: &Engine, configs: &[PoolConfig], tid: &TransactionId) -> Result<Arc<Self>> {
        let mgr = PoolManager { pools: DashMap::new() };
        for cfg in configs {
            let key = PoolKey::new(cfg.technology, cfg.language);
            if cfg.count == 0 {
                anyhow::bail!("Pool {} is configured with size 0", key);
            }
            if mgr.pools.contains_key(&key) {
                anyhow::bail!("Pool {} is configured more than once", key);
            }
            match Self::reconcile(engine, &key, cfg, tid).await {
                Ok(pool) => {
                    info!(tid=tid, key=%key, size=pool.len(), "Warm pool ready");
                    mgr.pools.insert(key, Arc::new(pool));
                },
                Err(e) => {
                    warn!(tid=tid, key=%key, error=%e, "Pool degraded, omitting key from the active set");
                },
            }
        }
        Ok(Arc::new(mgr))
    }

    /// Idempotent bootstrap for one pool: reuse containers found under their
    /// deterministic names, create the rest.
    async fn reconcile(engine: &Engine, key: &PoolKey, cfg: &PoolConfig, tid: &TransactionId) -> Result<WarmPool> {
        let mut containers = Vec::with_capacity(cfg.count as usize);
        for i in 0..cfg.count {
            let name = key.container_name(i);
            let handle = match engine.get_container(&name, tid).await? {
                Some(container_id) => {
                    debug!(tid=tid, name=%name, container_id=%container_id, "Reusing existing pool container");
                    ContainerHandle::new(container_id, name, *key, ContainerState::Unknown)
                },
                None => {
                    let container_id = engine.create_container(&name, &cfg.image(), key, tid).await?;
                    ContainerHandle::new(container_id, name, *key, ContainerState::Running)
                },
            };
            containers.push(Arc::new(handle));
        }
        WarmPool::new(containers)
    }

    /// Non-blocking: returns the next container in rotation or fails
    /// immediately when no healthy pool exists for the key.
    pub fn acquire(&self, key: &PoolKey, tid: &TransactionId) -> Result<Container> {
        match self.pools.get(key) {
            Some(pool) => {
                let container = pool.next();
                debug!(tid=tid, key=%key, container_id=%container.container_id, "Acquired warm container");
                Ok(container)
            },
            None => Err(PoolUnavailableError::boxed(*key)),
        }
    }

    pub fn active_keys(&self) -> Vec<PoolKey> {
        self.pools.iter().map(|e| *e.key()).collect()
    }

    /// Every container across all pools, for status reporting.
    pub fn iter_containers(&self) -> Vec<Container> {
        let mut ret = vec![];
        for pool in self.pools.iter() {
            for c in pool.containers() {
                ret.push(c.clone());
            }
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::containers::simulation::{SimEngine, SimFailure};
    use hearth_library::transaction::gen_tid;
    use hearth_library::types::{Language, Technology};
    use std::collections::HashMap;

    fn pool_cfg(technology: Technology, language: Language, count: u32) -> PoolConfig {
        PoolConfig {
            technology,
            language,
            count,
            image: None,
        }
    }

    async fn sim_pools(configs: &[PoolConfig]) -> (Arc<SimEngine>, Arc<PoolManager>) {
        let sim = SimEngine::boxed();
        let engine: Engine = sim.clone();
        let mgr = PoolManager::initialize(&engine, configs, &gen_tid())
            .await
            .expect("initialize should succeed");
        (sim, mgr)
    }

    #[rstest::rstest]
    #[case(1)]
    #[case(2)]
    #[case(4)]
    #[tokio::test]
    async fn round_robin_visits_each_container_once(#[case] size: u32) {
        let (_sim, mgr) = sim_pools(&[pool_cfg(Technology::Docker, Language::Python, size)]).await;
        let key = PoolKey::new(Technology::Docker, Language::Python);
        let tid = gen_tid();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..size {
            let c = mgr.acquire(&key, &tid).unwrap();
            assert!(seen.insert(c.name.clone()), "container {} repeated early", c.name);
        }
        // a full rotation later the same container comes back around
        let repeat = mgr.acquire(&key, &tid).unwrap();
        assert!(seen.contains(&repeat.name));
    }

    #[tokio::test]
    async fn acquire_unknown_key_fails_fast() {
        let (_sim, mgr) = sim_pools(&[pool_cfg(Technology::Docker, Language::Python, 1)]).await;
        let key = PoolKey::new(Technology::Gvisor, Language::Python);
        let err = mgr.acquire(&key, &gen_tid()).unwrap_err();
        let pool_err = err
            .downcast_ref::<PoolUnavailableError>()
            .expect("should be PoolUnavailableError");
        assert_eq!(pool_err.key, key);
    }

    #[tokio::test]
    async fn degraded_pool_is_omitted_but_startup_continues() {
        let sim = SimEngine::boxed();
        sim.fail_at(SimFailure::Create);
        let engine: Engine = sim.clone();
        let tid = gen_tid();
        // existing containers survive the create failure injection
        let healthy_key = PoolKey::new(Technology::Docker, Language::Python);
        sim.seed_container(&healthy_key.container_name(0), ContainerState::Running);
        let configs = vec![
            pool_cfg(Technology::Docker, Language::Python, 1),
            pool_cfg(Technology::Gvisor, Language::Python, 1),
        ];
        let mgr = PoolManager::initialize(&engine, &configs, &tid).await.unwrap();
        assert!(mgr.acquire(&healthy_key, &tid).is_ok());
        let gvisor_key = PoolKey::new(Technology::Gvisor, Language::Python);
        let err = mgr.acquire(&gvisor_key, &tid).unwrap_err();
        assert!(err.downcast_ref::<PoolUnavailableError>().is_some());
    }

    #[tokio::test]
    async fn reconcile_reuses_existing_containers() {
        let sim = SimEngine::boxed();
        let key = PoolKey::new(Technology::Docker, Language::Python);
        sim.seed_container(&key.container_name(0), ContainerState::Stopped);
        sim.seed_container(&key.container_name(2), ContainerState::Running);
        let engine: Engine = sim.clone();
        let mgr = PoolManager::initialize(&engine, &[pool_cfg(Technology::Docker, Language::Python, 3)], &gen_tid())
            .await
            .unwrap();
        // only the missing slot was created
        assert_eq!(sim.create_count(), 1);
        assert_eq!(mgr.iter_containers().len(), 3);
    }

    #[tokio::test]
    async fn zero_size_pool_is_a_config_error() {
        let sim = SimEngine::boxed();
        let engine: Engine = sim.clone();
        let res = PoolManager::initialize(&engine, &[pool_cfg(Technology::Docker, Language::Python, 0)], &gen_tid()).await;
        assert!(res.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn parallel_acquisitions_rotate_fairly() {
        let (_sim, mgr) = sim_pools(&[pool_cfg(Technology::Docker, Language::Python, 4)]).await;
        let key = PoolKey::new(Technology::Docker, Language::Python);
        let ts: u32 = 8;
        let per_task: u32 = 50;
        let barrier = Arc::new(tokio::sync::Barrier::new(ts as usize));
        let mut handles = vec![];
        for _ in 0..ts {
            let mgr_c = mgr.clone();
            let b_c = barrier.clone();
            handles.push(tokio::task::spawn(async move {
                let tid = gen_tid();
                b_c.wait().await;
                let mut names = vec![];
                for _ in 0..per_task {
                    names.push(mgr_c.acquire(&key, &tid).unwrap().name.clone());
                }
                names
            }));
        }
        let mut counts: HashMap<String, u32> = HashMap::new();
        for h in handles {
            for name in h.await.unwrap() {
                *counts.entry(name).or_insert(0) += 1;
            }
        }
        // total acquisitions divide evenly across the pool, so fair rotation
        // hands every container exactly the same share
        let expected = ts * per_task / 4;
        assert_eq!(counts.len(), 4);
        for (name, count) in counts {
            assert_eq!(count, expected, "container {} was selected {} times", name, count);
        }
    }
}
