use std::sync::Arc;
use std::time::Instant;

use fusiongate_planner::{
    OperationPlan, PlanBuilder, PlanningError, Request, Response, SchemaSelectionPolicy,
    ServerError,
};
use fusiongate_schema::CompositeSchema;
use serde_json::json;

use crate::cache::PlanCache;
use crate::diagnostics::{ExecutionDiagnostics, NoopDiagnostics};
use crate::introspection::{IntrospectionResolver, NoIntrospection};
use crate::metrics::METRICS;
use crate::{ErrorMode, Executor, ExecutorOptions, SourceSchemaClient};

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub executor: ExecutorOptions,
    /// Whether requests may choose their own error mode.
    pub allow_error_mode_override: bool,
    pub plan_cache_size: usize,
    /// Adds the plan to the `fusion.operationPlan` response extension.
    pub expose_operation_plan: bool,
    pub policy: SchemaSelectionPolicy,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            executor: Default::default(),
            allow_error_mode_override: false,
            plan_cache_size: 256,
            expose_operation_plan: false,
            policy: Default::default(),
        }
    }
}

/// Plans and executes client operations over a composite schema.
pub struct Gateway {
    schema: Arc<CompositeSchema>,
    options: GatewayOptions,
    cache: PlanCache,
    introspection: Arc<dyn IntrospectionResolver>,
    diagnostics: Arc<dyn ExecutionDiagnostics>,
}

impl Gateway {
    pub fn new(schema: Arc<CompositeSchema>, options: GatewayOptions) -> Self {
        Self {
            schema,
            cache: PlanCache::new(options.plan_cache_size),
            options,
            introspection: Arc::new(NoIntrospection),
            diagnostics: Arc::new(NoopDiagnostics),
        }
    }

    pub fn introspection(self, introspection: Arc<dyn IntrospectionResolver>) -> Self {
        Self {
            introspection,
            ..self
        }
    }

    pub fn diagnostics(self, diagnostics: Arc<dyn ExecutionDiagnostics>) -> Self {
        Self {
            diagnostics,
            ..self
        }
    }

    #[inline]
    pub fn schema(&self) -> &CompositeSchema {
        &self.schema
    }

    pub async fn plan(&self, request: &Request) -> Result<Arc<OperationPlan>, PlanningError> {
        let (plan, cached) = self
            .cache
            .get_or_plan(&request.query, request.operation.as_deref(), || {
                let document = parser::parse_query(&request.query)?;
                let mut builder =
                    PlanBuilder::new(&self.schema, document).policy(self.options.policy.clone());
                if let Some(operation) = &request.operation {
                    builder = builder.operation_name(operation);
                }
                builder.plan()
            })
            .await?;
        self.diagnostics.plan_completed(&plan, cached);
        Ok(plan)
    }

    /// Executes a client request.
    ///
    /// `error_mode` is honored only when overrides are allowed.
    pub async fn execute(
        &self,
        client: &dyn SourceSchemaClient,
        request: Request,
        error_mode: Option<ErrorMode>,
    ) -> Response {
        let start = Instant::now();
        METRICS.query_counter.add(1, &[]);
        self.diagnostics
            .execute_operation(request.operation.as_deref());

        let plan = match self.plan(&request).await {
            Ok(plan) => plan,
            Err(err) => {
                tracing::debug!(error = %err, "Failed to plan the operation.");
                let code = match err {
                    PlanningError::Parse(_) => "GRAPHQL_PARSE_FAILED",
                    PlanningError::Plan(_) => "OPERATION_PLANNING_FAILED",
                    _ => "GRAPHQL_VALIDATION_FAILED",
                };
                return Response::from_errors(vec![ServerError::new(err.to_string()).with_code(code)]);
            }
        };

        let mut options = self.options.executor.clone();
        match error_mode {
            Some(mode) if self.options.allow_error_mode_override => options.error_mode = mode,
            Some(mode) => {
                tracing::debug!(mode = ?mode, "Ignore the requested error mode.")
            }
            None => {}
        }

        let mut response = Executor::new(&self.schema, &plan, &options)
            .introspection(self.introspection.as_ref())
            .diagnostics(self.diagnostics.as_ref())
            .execute(client, &request.variables)
            .await;

        if self.options.expose_operation_plan {
            match serde_json::to_value(plan.as_ref()) {
                Ok(plan) => {
                    response
                        .extensions
                        .insert("fusion".to_string(), json!({ "operationPlan": plan }));
                }
                Err(err) => tracing::warn!(error = %err, "Failed to serialize the operation plan."),
            }
        }

        METRICS
            .query_histogram
            .record(start.elapsed().as_secs_f64(), &[]);
        response
    }
}
