use std::num::NonZeroUsize;
use std::sync::Arc;

use fusiongate_planner::{OperationPlan, PlanningError};
use lru::LruCache;
use tokio::sync::Mutex;

type PlanKey = (String, Option<String>);

/// Plans by query text and operation name.
///
/// A capacity of zero disables caching.
pub struct PlanCache {
    plans: Option<Mutex<LruCache<PlanKey, Arc<OperationPlan>>>>,
}

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            plans: NonZeroUsize::new(capacity).map(|capacity| Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Returns the cached plan, or plans the operation and caches the result.
    ///
    /// The flag tells whether the plan came from the cache.
    pub async fn get_or_plan<F>(
        &self,
        query: &str,
        operation_name: Option<&str>,
        plan: F,
    ) -> Result<(Arc<OperationPlan>, bool), PlanningError>
    where
        F: FnOnce() -> Result<OperationPlan, PlanningError>,
    {
        let plans = match &self.plans {
            Some(plans) => plans,
            None => return Ok((Arc::new(plan()?), false)),
        };

        let key = (query.to_string(), operation_name.map(ToString::to_string));
        if let Some(cached) = plans.lock().await.get(&key) {
            return Ok((cached.clone(), true));
        }

        let operation_plan = Arc::new(plan()?);
        plans.lock().await.put(key, operation_plan.clone());
        Ok((operation_plan, false))
    }
}
