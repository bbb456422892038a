use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fusiongate_executor::{
    ErrorMode, Executor, ExecutorOptions, Gateway, GatewayOptions, SourceSchemaClient,
    TransportError,
};
use fusiongate_planner::{PlanBuilder, Request, Response};
use fusiongate_schema::CompositeSchema;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

type Handler = Box<dyn Fn(&Request) -> Result<Value, TransportError> + Send + Sync>;

/// Answers every source schema with canned responses and records the requests it receives.
#[derive(Default)]
struct MockClient {
    handlers: HashMap<String, Handler>,
    delays: HashMap<String, Duration>,
    requests: Mutex<Vec<(String, Request)>>,
}

impl MockClient {
    fn handler(
        mut self,
        schema: &str,
        handler: impl Fn(&Request) -> Result<Value, TransportError> + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(schema.to_string(), Box::new(handler));
        self
    }

    fn respond(self, schema: &str, response: Value) -> Self {
        self.handler(schema, move |_| Ok(response.clone()))
    }

    fn delay(mut self, schema: &str, millis: u64) -> Self {
        self.delays
            .insert(schema.to_string(), Duration::from_millis(millis));
        self
    }

    fn calls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(schema, _)| schema.clone())
            .collect()
    }

    fn requests(&self, schema: &str) -> Vec<Request> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == schema)
            .map(|(_, request)| request.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl SourceSchemaClient for MockClient {
    async fn send(
        &self,
        schema: &str,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((schema.to_string(), request.clone()));

        if let Some(delay) = self.delays.get(schema) {
            tokio::select! {
                _ = tokio::time::sleep(*delay) => {}
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            }
        }

        let handler = self
            .handlers
            .get(schema)
            .ok_or_else(|| TransportError::UnknownSchema(schema.to_string()))?;
        Ok(serde_json::from_value(handler(&request)?).unwrap())
    }
}

fn schema() -> CompositeSchema {
    CompositeSchema::parse(include_str!("test.graphql")).unwrap()
}

/// Lookup arguments of every entity in a batched request.
fn entity_keys(request: &Request, argument: &str) -> Vec<Value> {
    (0..)
        .map_while(|idx| {
            request
                .variables
                .get(&format!("__fusion_e{}_{}", idx, argument))
                .cloned()
        })
        .collect()
}

fn offline(_: &Request) -> Result<Value, TransportError> {
    Err(TransportError::Other(anyhow::anyhow!("connection refused")))
}

async fn execute_with(
    client: &MockClient,
    query: &str,
    variables: Value,
    options: ExecutorOptions,
) -> Value {
    let schema = schema();
    let document = parser::parse_query(query).unwrap();
    let plan = PlanBuilder::new(&schema, document).plan().unwrap();
    let response = Executor::new(&schema, &plan, &options)
        .execute(client, variables.as_object().unwrap())
        .await;
    serde_json::to_value(response).unwrap()
}

async fn execute(client: &MockClient, query: &str, mode: ErrorMode) -> Value {
    execute_with(
        client,
        query,
        json!({}),
        ExecutorOptions {
            error_mode: mode,
            ..Default::default()
        },
    )
    .await
}

fn book_client() -> MockClient {
    MockClient::default()
        .respond(
            "a",
            json!({ "data": { "bookById": { "title": "Dune", "__fusion_id": "1" } } }),
        )
        .respond("b", json!({ "data": { "e0": { "author": "Herbert" } } }))
}

#[tokio::test]
async fn resolve_entity_from_second_schema() {
    let client = book_client();
    let response = execute(
        &client,
        "{ bookById(id: 1) { title author } }",
        ErrorMode::Propagate,
    )
    .await;

    assert_eq!(
        response,
        json!({ "data": { "bookById": { "title": "Dune", "author": "Herbert" } } })
    );
    assert_eq!(client.calls(), vec!["a", "b"]);

    let lookup = &client.requests("b")[0];
    assert_eq!(
        lookup.query,
        "query($__fusion_e0_id: ID!) { e0: bookById(id: $__fusion_e0_id) { author } }"
    );
    assert_eq!(entity_keys(lookup, "id"), vec![json!("1")]);
}

#[tokio::test]
async fn offline_schema_propagates_to_root() {
    let client = MockClient::default().handler("c", offline);
    let response = execute(&client, "{ viewer { name } }", ErrorMode::Propagate).await;
    assert_eq!(
        response,
        json!({
            "data": null,
            "errors": [{
                "message": "connection refused",
                "path": ["viewer"],
                "extensions": { "code": "SOURCE_SCHEMA_TRANSPORT_ERROR" }
            }]
        })
    );
}

#[tokio::test]
async fn offline_schema_halts() {
    let client = MockClient::default().handler("c", offline);
    let response = execute(&client, "{ viewer { name } }", ErrorMode::Halt).await;
    assert_eq!(
        response,
        json!({
            "errors": [{
                "message": "connection refused",
                "path": ["viewer"],
                "extensions": { "code": "SOURCE_SCHEMA_TRANSPORT_ERROR" }
            }]
        })
    );
}

fn unrated_client() -> MockClient {
    MockClient::default()
        .respond(
            "a",
            json!({ "data": { "bookById": { "title": "Dune", "__fusion_id": "1" } } }),
        )
        .respond("b", json!({ "data": { "e0": { "rating": null } } }))
}

#[tokio::test]
async fn null_in_non_null_field() {
    let query = "{ bookById(id: 1) { title rating } }";

    let response = execute(&unrated_client(), query, ErrorMode::Propagate).await;
    assert_eq!(response["data"], json!({ "bookById": null }));
    assert_eq!(response["errors"].as_array().unwrap().len(), 1);
    assert_eq!(
        response["errors"][0]["message"],
        json!("Cannot return null for non-nullable field Book.rating.")
    );
    assert_eq!(response["errors"][0]["path"], json!(["bookById", "rating"]));

    let response = execute(&unrated_client(), query, ErrorMode::Null).await;
    assert_eq!(
        response["data"],
        json!({ "bookById": { "title": "Dune", "rating": null } })
    );
    assert_eq!(response["errors"].as_array().unwrap().len(), 1);

    let response = execute(&unrated_client(), query, ErrorMode::Halt).await;
    assert!(response.get("data").is_none());
    assert_eq!(response["errors"][0]["path"], json!(["bookById", "rating"]));
}

#[tokio::test]
async fn rebase_lookup_errors() {
    let client = MockClient::default()
        .respond(
            "a",
            json!({
                "data": {
                    "books": [
                        { "title": "Dune", "__fusion_id": "1" },
                        { "title": "Emma", "__fusion_id": "2" }
                    ]
                }
            }),
        )
        .respond(
            "b",
            json!({
                "data": { "e0": { "author": "Herbert" }, "e1": { "author": null } },
                "errors": [{ "message": "author unavailable", "path": ["e1", "author"] }]
            }),
        );

    let response = execute(&client, "{ books { title author } }", ErrorMode::Propagate).await;
    assert_eq!(
        response,
        json!({
            "data": {
                "books": [
                    { "title": "Dune", "author": "Herbert" },
                    { "title": "Emma", "author": null }
                ]
            },
            "errors": [{ "message": "author unavailable", "path": ["books", 1, "author"] }]
        })
    );
}

#[tokio::test]
async fn fetch_identical_entities_once() {
    let client = MockClient::default()
        .respond(
            "a",
            json!({ "data": { "books": [{ "__fusion_id": "1" }, { "__fusion_id": "1" }] } }),
        )
        .respond("b", json!({ "data": { "e0": { "author": "Herbert" } } }));

    let response = execute(&client, "{ books { author } }", ErrorMode::Propagate).await;
    assert_eq!(
        response,
        json!({ "data": { "books": [{ "author": "Herbert" }, { "author": "Herbert" }] } })
    );

    let lookup = &client.requests("b")[0];
    assert_eq!(entity_keys(lookup, "id"), vec![json!("1")]);
    assert_eq!(
        lookup.query,
        "query($__fusion_e0_id: ID!) { e0: bookById(id: $__fusion_e0_id) { author } }"
    );
}

#[tokio::test]
async fn fetch_entities_of_aliased_paths_once() {
    let client = MockClient::default()
        .respond(
            "a",
            json!({
                "data": {
                    "x": { "title": "Dune", "__fusion_id": "1" },
                    "y": { "title": "Dune", "__fusion_id": "1" }
                }
            }),
        )
        .respond("b", json!({ "data": { "e0": { "author": "Herbert" } } }));

    let response = execute(
        &client,
        "{ x: bookById(id: 1) { title author } y: bookById(id: 1) { title author } }",
        ErrorMode::Propagate,
    )
    .await;
    assert_eq!(
        response,
        json!({
            "data": {
                "x": { "title": "Dune", "author": "Herbert" },
                "y": { "title": "Dune", "author": "Herbert" }
            }
        })
    );
    assert_eq!(client.calls(), vec!["a", "b"]);

    let lookup = &client.requests("b")[0];
    assert_eq!(
        lookup.query,
        "query($__fusion_e0_id: ID!) { e0: bookById(id: $__fusion_e0_id) { author } }"
    );
    assert_eq!(
        Value::Object(lookup.variables.clone()),
        json!({ "__fusion_e0_id": "1" })
    );
}

#[tokio::test(start_paused = true)]
async fn requirements_wait_for_provider() {
    let client = MockClient::default()
        .delay("a", 20)
        .respond(
            "a",
            json!({
                "data": { "books": [{ "title": "Dune", "__fusion_id": "1", "__fusion_weight": 10 }] }
            }),
        )
        .respond("c", json!({ "data": { "e0": { "shippingEstimate": 3 } } }));

    let response = execute(
        &client,
        "{ books { title shippingEstimate } }",
        ErrorMode::Propagate,
    )
    .await;
    assert_eq!(
        response,
        json!({ "data": { "books": [{ "title": "Dune", "shippingEstimate": 3 }] } })
    );
    assert_eq!(client.calls(), vec!["a", "c"]);

    let lookup = &client.requests("c")[0];
    assert_eq!(
        Value::Object(lookup.variables.clone()),
        json!({ "__fusion_e0_id": "1", "__fusion_e0_r0": 10 })
    );
}

fn skip_client() -> MockClient {
    MockClient::default()
        .respond(
            "a",
            json!({
                "data": {
                    "first": { "title": "Dune", "__fusion_id": "1" },
                    "second": { "title": "Emma", "__fusion_id": "2" }
                }
            }),
        )
        .handler("b", |request| {
            let data = entity_keys(request, "id")
                .into_iter()
                .enumerate()
                .map(|(idx, id)| {
                    let author = if id == json!("1") { "Herbert" } else { "Austen" };
                    (format!("e{}", idx), json!({ "author": author }))
                })
                .collect::<serde_json::Map<_, _>>();
            Ok(json!({ "data": data }))
        })
}

#[tokio::test]
async fn skipped_fields_are_never_fetched() {
    let query = r#"query($skip: Boolean!) {
        first: bookById(id: 1) { title author @skip(if: $skip) }
        second: bookById(id: 2) { title author @skip(if: $skip) }
    }"#;

    let client = skip_client();
    let response = execute_with(
        &client,
        query,
        json!({ "skip": true }),
        Default::default(),
    )
    .await;
    assert_eq!(
        response,
        json!({ "data": { "first": { "title": "Dune" }, "second": { "title": "Emma" } } })
    );
    assert_eq!(client.calls(), vec!["a"]);
    assert!(!client.requests("a")[0].query.contains("@skip"));

    let client = skip_client();
    let response = execute_with(
        &client,
        query,
        json!({ "skip": false }),
        Default::default(),
    )
    .await;
    assert_eq!(
        response,
        json!({
            "data": {
                "first": { "title": "Dune", "author": "Herbert" },
                "second": { "title": "Emma", "author": "Austen" }
            }
        })
    );
    let lookups = client.requests("b");
    assert_eq!(lookups.len(), 1);
    assert_eq!(entity_keys(&lookups[0], "id"), vec![json!("1"), json!("2")]);
}

#[tokio::test(start_paused = true)]
async fn completion_order_does_not_change_the_response() {
    let query = "{ bookById(id: 1) { title author shippingEstimate } }";
    let client = |slow: &str, fast: &str| {
        MockClient::default()
            .respond(
                "a",
                json!({
                    "data": {
                        "bookById": { "title": "Dune", "__fusion_id": "1", "__fusion_weight": 10 }
                    }
                }),
            )
            .respond("b", json!({ "data": { "e0": { "author": "Herbert" } } }))
            .respond("c", json!({ "data": { "e0": { "shippingEstimate": 3 } } }))
            .delay(slow, 30)
            .delay(fast, 5)
    };

    let first = execute(&client("b", "c"), query, ErrorMode::Propagate).await;
    let second = execute(&client("c", "b"), query, ErrorMode::Propagate).await;
    assert_eq!(
        first,
        json!({ "data": { "bookById": { "title": "Dune", "author": "Herbert", "shippingEstimate": 3 } } })
    );
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn bounded_fan_out() {
    let query = "{ bookById(id: 1) { title author shippingEstimate } }";
    let client = || {
        MockClient::default()
            .respond(
                "a",
                json!({
                    "data": {
                        "bookById": { "title": "Dune", "__fusion_id": "1", "__fusion_weight": 10 }
                    }
                }),
            )
            .respond("b", json!({ "data": { "e0": { "author": "Herbert" } } }))
            .respond("c", json!({ "data": { "e0": { "shippingEstimate": 3 } } }))
            .delay("b", 30)
            .delay("c", 30)
    };

    let elapsed = move |max_concurrency: usize| {
        let client = client();
        async move {
            let start = tokio::time::Instant::now();
            let response = execute_with(
                &client,
                query,
                json!({}),
                ExecutorOptions {
                    max_concurrency,
                    ..Default::default()
                },
            )
            .await;
            assert_eq!(
                response["data"],
                json!({ "bookById": { "title": "Dune", "author": "Herbert", "shippingEstimate": 3 } })
            );
            start.elapsed()
        }
    };

    let parallel = elapsed(ExecutorOptions::default().max_concurrency).await;
    assert!(parallel >= Duration::from_millis(30) && parallel < Duration::from_millis(60));

    let serial = elapsed(1).await;
    assert!(serial >= Duration::from_millis(60));
}

#[tokio::test(start_paused = true)]
async fn timeout_cancels_outstanding_requests() {
    let client = book_client().delay("a", 1000);
    let response = execute_with(
        &client,
        "{ bookById(id: 1) { title } }",
        json!({}),
        ExecutorOptions {
            timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(
        response,
        json!({
            "data": { "bookById": null },
            "errors": [{
                "message": "Request timed out.",
                "path": ["bookById"],
                "extensions": { "code": "SOURCE_SCHEMA_TRANSPORT_ERROR" }
            }]
        })
    );
}

#[tokio::test]
async fn gateway_exposes_operation_plan() {
    let gateway = Gateway::new(
        Arc::new(schema()),
        GatewayOptions {
            expose_operation_plan: true,
            ..Default::default()
        },
    );
    let response = gateway
        .execute(
            &book_client(),
            Request::new("{ bookById(id: 1) { title author } }"),
            None,
        )
        .await;
    let response = serde_json::to_value(response).unwrap();

    assert_eq!(
        response["data"],
        json!({ "bookById": { "title": "Dune", "author": "Herbert" } })
    );
    let plan = &response["extensions"]["fusion"]["operationPlan"];
    assert_eq!(plan["nodes"].as_array().unwrap().len(), 4);
    assert_eq!(plan["dependencies"], json!([[], [], [], [2]]));
}

#[tokio::test]
async fn gateway_error_mode_override() {
    let query = "{ bookById(id: 1) { title rating } }";

    let strict = Gateway::new(Arc::new(schema()), Default::default());
    let response = strict
        .execute(&unrated_client(), Request::new(query), Some(ErrorMode::Null))
        .await;
    assert_eq!(response.data, Some(json!({ "bookById": null })));

    let lenient = Gateway::new(
        Arc::new(schema()),
        GatewayOptions {
            allow_error_mode_override: true,
            ..Default::default()
        },
    );
    let response = lenient
        .execute(&unrated_client(), Request::new(query), Some(ErrorMode::Null))
        .await;
    assert_eq!(
        response.data,
        Some(json!({ "bookById": { "title": "Dune", "rating": null } }))
    );
}

#[tokio::test]
async fn gateway_reports_planning_errors() {
    let gateway = Gateway::new(Arc::new(schema()), Default::default());
    let client = MockClient::default();

    let response = gateway
        .execute(&client, Request::new("{ nope }"), None)
        .await;
    assert_eq!(
        serde_json::to_value(response).unwrap(),
        json!({
            "errors": [{
                "message": "Cannot query field 'nope' on type 'Query'.",
                "extensions": { "code": "GRAPHQL_VALIDATION_FAILED" }
            }]
        })
    );

    let response = gateway
        .execute(&client, Request::new("{ books { "), None)
        .await;
    assert_eq!(
        response.errors[0].extensions["code"],
        json!("GRAPHQL_PARSE_FAILED")
    );
    assert!(client.calls().is_empty());
}
