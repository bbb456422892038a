use std::collections::{BTreeMap, VecDeque};
use std::str::FromStr;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use fusiongate_planner::{
    key_variable, requirement_variable, ErrorPath, ExecutionNode, FieldKind, NodeId,
    OperationPlan, PlanSelection, PlanSelectionSet, Request, RequirementBinding, ResolveNode,
    Response, ServerError,
};
use fusiongate_schema::CompositeSchema;
use opentelemetry::trace::{FutureExt, SpanKind, TraceContextExt, Tracer};
use opentelemetry::{global, Context, KeyValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::constants::*;
use crate::diagnostics::{ExecutionDiagnostics, NoopDiagnostics};
use crate::introspection::{IntrospectionResolver, NoIntrospection};
use crate::metrics::METRICS;
use crate::propagation::complete_data;
use crate::requirements::{EntityBatch, VariableRequirementStore};
use crate::result::{Location, ResultTree};
use crate::{ConditionalVisibilitySet, InvalidErrorMode, SourceSchemaClient, TransportError};

/// Error code of errors reported for source schemas that could not be reached.
pub const TRANSPORT_ERROR_CODE: &str = "SOURCE_SCHEMA_TRANSPORT_ERROR";

/// How null values in non-null positions are handled.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Null bubbles up to the nearest nullable ancestor.
    #[default]
    Propagate,
    /// Only the offending field is nulled.
    Null,
    /// The first error aborts the operation and no data is returned.
    Halt,
}

impl FromStr for ErrorMode {
    type Err = InvalidErrorMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "propagate" => Ok(ErrorMode::Propagate),
            "null" => Ok(ErrorMode::Null),
            "halt" => Ok(ErrorMode::Halt),
            _ => Err(InvalidErrorMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub error_mode: ErrorMode,
    /// Maximum number of source schema requests in flight.
    pub max_concurrency: usize,
    pub timeout: Option<Duration>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            error_mode: ErrorMode::Propagate,
            max_concurrency: 16,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum NodeState {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Skipped,
}

enum Dispatch {
    Fetch { schema: String, request: Request },
    Done,
}

struct RunState {
    visible: ConditionalVisibilitySet,
    tree: ResultTree,
    store: VariableRequirementStore,
    states: Vec<NodeState>,
    /// Unfinished dependencies per node.
    pending: Vec<usize>,
    dependents: Vec<Vec<NodeId>>,
    ready: VecDeque<NodeId>,
    errors: BTreeMap<NodeId, Vec<ServerError>>,
    halted: bool,
}

impl RunState {
    fn new(plan: &OperationPlan, visible: ConditionalVisibilitySet) -> Self {
        let count = plan.nodes.len();
        let mut states = vec![NodeState::Completed; count];
        let mut pending = vec![0; count];
        let mut dependents = vec![Vec::new(); count];

        for id in plan.executable_nodes() {
            states[id] = NodeState::Pending;
            for dependency in plan.dependencies(id) {
                dependents[*dependency].push(id);
                pending[id] += 1;
            }
        }

        let mut ready = VecDeque::new();
        for id in plan.executable_nodes() {
            if pending[id] == 0 {
                states[id] = NodeState::Scheduled;
                ready.push_back(id);
            }
        }

        Self {
            visible,
            tree: ResultTree::default(),
            store: VariableRequirementStore::default(),
            states,
            pending,
            dependents,
            ready,
            errors: BTreeMap::new(),
            halted: false,
        }
    }

    fn record(&mut self, id: NodeId, errors: Vec<ServerError>) {
        if !errors.is_empty() {
            self.errors.entry(id).or_default().extend(errors);
        }
    }

    fn has_errors(&self, id: NodeId) -> bool {
        self.errors.get(&id).map_or(false, |errors| !errors.is_empty())
    }
}

/// Runs one [`OperationPlan`] against the source schemas.
pub struct Executor<'e> {
    schema: &'e CompositeSchema,
    plan: &'e OperationPlan,
    options: &'e ExecutorOptions,
    introspection: &'e dyn IntrospectionResolver,
    diagnostics: &'e dyn ExecutionDiagnostics,
}

impl<'e> Executor<'e> {
    pub fn new(
        schema: &'e CompositeSchema,
        plan: &'e OperationPlan,
        options: &'e ExecutorOptions,
    ) -> Self {
        Executor {
            schema,
            plan,
            options,
            introspection: &NoIntrospection,
            diagnostics: &NoopDiagnostics,
        }
    }

    pub fn introspection(self, introspection: &'e dyn IntrospectionResolver) -> Self {
        Self {
            introspection,
            ..self
        }
    }

    pub fn diagnostics(self, diagnostics: &'e dyn ExecutionDiagnostics) -> Self {
        Self {
            diagnostics,
            ..self
        }
    }

    pub async fn execute(
        self,
        client: &dyn SourceSchemaClient,
        variables: &Map<String, Value>,
    ) -> Response {
        let tracer = global::tracer("graphql");
        let span = tracer
            .span_builder("execute")
            .with_kind(SpanKind::Server)
            .start(&tracer);
        let cx = Context::current_with_span(span);
        self.execute_plan(client, variables).with_context(cx).await
    }

    async fn execute_plan(
        &self,
        client: &dyn SourceSchemaClient,
        variables: &Map<String, Value>,
    ) -> Response {
        let visible = ConditionalVisibilitySet::new(&self.plan.operation, variables);
        let mut state = RunState::new(self.plan, visible);
        let cancel = CancellationToken::new();
        let mut running = FuturesUnordered::new();
        let max_concurrency = self.options.max_concurrency.max(1);

        let deadline = self
            .options
            .timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);
        let timer = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => futures_util::future::pending::<()>().await,
            }
        };
        tokio::pin!(timer);
        let mut timed_out = false;

        loop {
            while !state.halted && running.len() < max_concurrency {
                let id = match state.ready.pop_front() {
                    Some(id) => id,
                    None => break,
                };
                match self.dispatch(id, &mut state, variables) {
                    Dispatch::Fetch { schema, request } => {
                        state.states[id] = NodeState::Running;
                        self.diagnostics.node_dispatched(id, &schema);
                        METRICS
                            .fetch_counter
                            .add(1, &[KeyValue::new(KEY_SCHEMA, schema.clone())]);
                        running.push(self.fetch(client, id, schema, request, cancel.clone()));
                    }
                    Dispatch::Done => self.finish_node(id, &mut state, &cancel),
                }
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                next = running.next() => {
                    if let Some((id, result)) = next {
                        if timed_out {
                            let errors = self.transport_errors(id, &state, &TransportError::Timeout);
                            state.record(id, errors);
                        } else if state.halted {
                            tracing::debug!(node = id, "Discard the result of a halted operation.");
                            state.states[id] = NodeState::Skipped;
                        } else {
                            self.complete(id, result, &mut state);
                        }
                        self.finish_node(id, &mut state, &cancel);
                    }
                }
                _ = &mut timer, if !timed_out => {
                    tracing::warn!(running = running.len(), "Operation timed out.");
                    timed_out = true;
                    state.halted = true;
                    cancel.cancel();
                }
            }
        }

        let RunState {
            visible,
            tree,
            errors,
            ..
        } = state;
        let mut errors = errors.into_values().flatten().collect::<Vec<_>>();
        let data = complete_data(
            &self.plan.operation,
            &visible,
            tree.into_data(),
            &mut errors,
            self.options.error_mode,
        );

        Response {
            data,
            errors,
            extensions: Default::default(),
            headers: None,
        }
    }

    fn dispatch(
        &self,
        id: NodeId,
        state: &mut RunState,
        variables: &Map<String, Value>,
    ) -> Dispatch {
        match self.plan.node(id) {
            Some(ExecutionNode::Introspection(_)) => {
                self.resolve_introspection(id, state, variables);
                Dispatch::Done
            }
            Some(ExecutionNode::Resolve(node)) => self.prepare(node, &[], state, variables),
            Some(ExecutionNode::NodeWithRequirement(node)) => {
                self.prepare(&node.node, &node.requirements, state, variables)
            }
            _ => Dispatch::Done,
        }
    }

    fn prepare(
        &self,
        node: &ResolveNode,
        requirements: &[RequirementBinding],
        state: &mut RunState,
        variables: &Map<String, Value>,
    ) -> Dispatch {
        let entities = match &node.lookup {
            Some(_) => state.store.collect(node, requirements, &state.tree),
            None => 1,
        };

        let rendered = match self
            .plan
            .render(node.id, state.visible.as_slice(), entities)
        {
            Some(rendered) => rendered,
            None => {
                tracing::debug!(node = node.id, schema = %node.schema, "Skip node with nothing to fetch.");
                state.states[node.id] = NodeState::Skipped;
                return Dispatch::Done;
            }
        };

        let mut request_variables = Map::new();
        for name in &rendered.variables {
            let value = variables
                .get(name.as_str())
                .cloned()
                .or_else(|| self.default_value(name));
            if let Some(value) = value {
                request_variables.insert(name.to_string(), value);
            }
        }
        if let Some(lookup) = &node.lookup {
            for (entity, batch) in state.store.batches(node.id).iter().enumerate() {
                for (key, value) in lookup.arguments.iter().zip(&batch.keys) {
                    request_variables.insert(key_variable(entity, &key.argument), value.clone());
                }
                for idx in &rendered.requirements {
                    if let Some(value) = batch.requirements.get(*idx) {
                        request_variables.insert(requirement_variable(entity, *idx), value.clone());
                    }
                }
            }
        }

        Dispatch::Fetch {
            schema: node.schema.clone(),
            request: Request::new(rendered.query).variables(request_variables),
        }
    }

    fn default_value(&self, name: &str) -> Option<Value> {
        self.plan
            .operation
            .variable_definition(name)
            .and_then(|definition| definition.default_value.as_ref())
            .and_then(|value| serde_json::to_value(&value.node).ok())
    }

    fn fetch<'c>(
        &self,
        client: &'c dyn SourceSchemaClient,
        id: NodeId,
        schema: String,
        request: Request,
        cancel: CancellationToken,
    ) -> BoxFuture<'c, (NodeId, Result<Response, TransportError>)> {
        let path = self
            .plan
            .resolve_node(id)
            .map(|node| node.path.to_string())
            .unwrap_or_default();

        let tracer = global::tracer("graphql");
        let span = tracer
            .span_builder(format!("resolve [{}]", schema))
            .with_kind(SpanKind::Server)
            .with_attributes(vec![
                KeyValue::new(KEY_SCHEMA, schema.clone()),
                KeyValue::new(KEY_NODE, id as i64),
                KeyValue::new(KEY_QUERY, request.query.clone()),
                KeyValue::new(
                    KEY_VARIABLES,
                    serde_json::to_string(&request.variables).unwrap_or_default(),
                ),
                KeyValue::new(KEY_PATH, path),
            ])
            .start(&tracer);
        let cx = Context::current_with_span(span);

        Box::pin(
            async move {
                let res = client.send(&schema, request, &cancel).await;
                if let Err(err) = &res {
                    let cx = Context::current();
                    cx.span()
                        .set_attribute(KeyValue::new(KEY_ERROR, err.to_string()));
                }
                (id, res)
            }
            .with_context(cx),
        )
    }

    fn complete(
        &self,
        id: NodeId,
        result: Result<Response, TransportError>,
        state: &mut RunState,
    ) {
        let node = match self.plan.resolve_node(id) {
            Some(node) => node,
            None => return,
        };

        match result {
            Ok(response) => {
                let batches = state.store.batches(id);
                let errors = rebase_errors(node, batches, response.errors);

                match (&node.lookup, response.data) {
                    (None, Some(data)) => state.tree.merge_root(data),
                    (Some(_), Some(Value::Object(mut data))) => {
                        for (entity, batch) in batches.iter().enumerate() {
                            if let Some(value) = data.remove(&format!("e{}", entity)) {
                                for location in &batch.locations {
                                    state.tree.merge_at(location, value.clone());
                                }
                            }
                        }
                    }
                    _ => {}
                }
                state.record(id, errors);
            }
            Err(err) => {
                tracing::warn!(node = id, schema = %node.schema, error = %err, "Source schema request failed.");
                let errors = self.transport_errors(id, state, &err);
                state.record(id, errors);
            }
        }
    }

    /// One error per entity and top level field of the node.
    fn transport_errors(
        &self,
        id: NodeId,
        state: &RunState,
        err: &TransportError,
    ) -> Vec<ServerError> {
        let node = match self.plan.resolve_node(id) {
            Some(node) => node,
            None => return Vec::new(),
        };

        let locations: Vec<Location> = match &node.lookup {
            Some(_) => state
                .store
                .batches(id)
                .iter()
                .flat_map(|batch| batch.locations.iter().cloned())
                .collect(),
            None => vec![Vec::new()],
        };
        let mut keys = Vec::new();
        response_keys(&node.selection_set, &state.visible, &mut keys);

        let mut errors = Vec::new();
        for location in locations {
            if keys.is_empty() {
                errors.push(transport_error(err, location.clone()));
            }
            for key in &keys {
                let mut path = location.clone();
                path.push(ErrorPath::Name(key.clone()));
                errors.push(transport_error(err, path));
            }
        }
        errors
    }

    fn resolve_introspection(
        &self,
        id: NodeId,
        state: &mut RunState,
        variables: &Map<String, Value>,
    ) {
        let mut data = Map::new();
        let mut errors = Vec::new();

        for field in &self.plan.operation.selection_set.shared {
            if field.kind != FieldKind::Introspection || !state.visible.is_visible(&field.conditions)
            {
                continue;
            }
            match self.introspection.resolve(self.schema, field, variables) {
                Ok(value) => {
                    data.insert(field.response_key.to_string(), value);
                }
                Err(mut error) => {
                    if error.path.is_empty() {
                        error.path = vec![ErrorPath::Name(field.response_key.to_string())];
                    }
                    if error.locations.is_empty() {
                        error.locations = vec![field.pos];
                    }
                    errors.push(error);
                }
            }
        }

        state.tree.merge_root(Value::Object(data));
        state.record(id, errors);
    }

    fn finish_node(&self, id: NodeId, state: &mut RunState, cancel: &CancellationToken) {
        let failed = state.has_errors(id);
        if matches!(state.states[id], NodeState::Scheduled | NodeState::Running) {
            state.states[id] = if failed {
                NodeState::Failed
            } else {
                NodeState::Completed
            };
        }
        self.diagnostics.node_completed(
            id,
            state
                .errors
                .get(&id)
                .map(|errors| errors.as_slice())
                .unwrap_or_default(),
        );

        if failed && self.options.error_mode == ErrorMode::Halt && !state.halted {
            tracing::debug!(node = id, "Halt the operation on the first error.");
            state.halted = true;
            cancel.cancel();
        }

        for idx in 0..state.dependents[id].len() {
            let dependent = state.dependents[id][idx];
            state.pending[dependent] = state.pending[dependent].saturating_sub(1);
            if state.pending[dependent] == 0 && state.states[dependent] == NodeState::Pending {
                state.states[dependent] = NodeState::Scheduled;
                state.ready.push_back(dependent);
            }
        }
    }
}

fn transport_error(err: &TransportError, path: Vec<ErrorPath>) -> ServerError {
    ServerError::new(err.to_string())
        .with_path(path)
        .with_code(TRANSPORT_ERROR_CODE)
}

/// Visible response keys selected at the top of a node, injected keys excluded.
fn response_keys(
    selection_set: &PlanSelectionSet,
    visible: &ConditionalVisibilitySet,
    keys: &mut Vec<String>,
) {
    for selection in &selection_set.0 {
        match selection {
            PlanSelection::Field(field) => {
                let key = field.response_key();
                if visible.is_visible(&field.conditions)
                    && !key.starts_with("__fusion_")
                    && !keys.iter().any(|existing| existing == key.as_str())
                {
                    keys.push(key.to_string());
                }
            }
            PlanSelection::InlineFragment { selection_set, .. } => {
                response_keys(selection_set, visible, keys)
            }
        }
    }
}

/// Moves errors reported against `eN` aliases to the locations of the entities.
fn rebase_errors(
    node: &ResolveNode,
    batches: &[EntityBatch],
    errors: Vec<ServerError>,
) -> Vec<ServerError> {
    let mut rebased = Vec::new();

    for mut error in errors {
        error.locations.clear();
        if node.lookup.is_none() {
            rebased.push(error);
            continue;
        }

        let batch = match error.path.first() {
            Some(ErrorPath::Name(alias)) => alias
                .strip_prefix('e')
                .and_then(|idx| idx.parse::<usize>().ok())
                .and_then(|idx| batches.get(idx)),
            _ => None,
        };
        match batch {
            Some(batch) => {
                for location in &batch.locations {
                    let mut error = error.clone();
                    error.path = location
                        .iter()
                        .chain(error.path.iter().skip(1))
                        .cloned()
                        .collect();
                    rebased.push(error);
                }
            }
            None => {
                error.path = batches
                    .first()
                    .and_then(|batch| batch.locations.first())
                    .cloned()
                    .unwrap_or_default();
                rebased.push(error);
            }
        }
    }

    rebased
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_mode() {
        assert_eq!("propagate".parse::<ErrorMode>(), Ok(ErrorMode::Propagate));
        assert_eq!("null".parse::<ErrorMode>(), Ok(ErrorMode::Null));
        assert_eq!("halt".parse::<ErrorMode>(), Ok(ErrorMode::Halt));
        assert_eq!(
            "strict".parse::<ErrorMode>(),
            Err(InvalidErrorMode("strict".to_string()))
        );
        assert_eq!(
            serde_json::from_str::<ErrorMode>("\"halt\"").unwrap(),
            ErrorMode::Halt
        );
    }
}
