use once_cell::sync::Lazy;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
};

pub struct Metrics {
    pub query_counter: Counter<u64>,
    pub query_histogram: Histogram<f64>,
    pub fetch_counter: Counter<u64>,
}

pub static METRICS: Lazy<Metrics> = Lazy::new(|| {
    let meter = global::meter("fusiongate");
    let query_counter = meter
        .u64_counter("fusiongate.queries_total")
        .with_description("Total number of GraphQL operations executed")
        .init();
    let query_histogram = meter
        .f64_histogram("fusiongate.graphql_query_duration_seconds")
        .with_description("The GraphQL operation latencies in seconds.")
        .init();
    let fetch_counter = meter
        .u64_counter("fusiongate.source_requests_total")
        .with_description("Total number of requests sent to source schemas")
        .init();
    Metrics {
        query_counter,
        query_histogram,
        fetch_counter,
    }
});
