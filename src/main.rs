#![forbid(unsafe_code)]

mod config;
mod options;

use std::sync::Arc;

use anyhow::{Context, Result};
use fusiongate_executor::{Gateway, HttpFetcher};
use fusiongate_planner::Request;
use fusiongate_schema::CompositeSchema;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use serde_json::{Map, Value};
use structopt::StructOpt;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use config::Config;
use options::Options;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn read_file(path: &str, what: &str) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to load {} '{}'.", what, path))
}

/// Headers of the client request that the config allows to reach source schemas.
fn forwarded_headers(headers: &[String], forward_headers: &[String]) -> Result<HeaderMap> {
    let mut header_map = HeaderMap::new();
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Invalid header '{}', expected 'Name: value'.", header))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("Invalid header name '{}'.", name))?;
        if !forward_headers
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(name.as_str()))
        {
            tracing::debug!(header = %name, "Header is not forwarded.");
            continue;
        }
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("Invalid value of header '{}'.", name))?;
        header_map.append(name, value);
    }
    Ok(header_map)
}

#[tokio::main]
async fn main() -> Result<()> {
    let options: Options = Options::from_args();
    init_tracing();

    let config = toml::from_str::<Config>(&read_file(&options.config, "config file")?)
        .with_context(|| format!("Failed to parse config file '{}'.", options.config))?;
    let schema = CompositeSchema::parse(&read_file(&options.schema, "composite schema")?)
        .with_context(|| format!("Failed to parse composite schema '{}'.", options.schema))?;
    tracing::info!(source_schemas = ?schema.source_schemas, "Composite schema loaded.");

    let route_table = config.create_route_table();
    for name in &schema.source_schemas {
        if !route_table.contains_key(name) {
            tracing::warn!(schema = %name, "Source schema has no route.");
        }
    }

    let variables = match &options.variables {
        Some(path) => serde_json::from_str::<Map<String, Value>>(&read_file(path, "variables")?)
            .with_context(|| format!("Failed to parse variables '{}'.", path))?,
        None => Map::new(),
    };
    let mut request = Request::new(read_file(&options.query, "operation")?).variables(variables);
    if let Some(operation) = &options.operation {
        request = request.operation(operation.clone());
    }

    let header_map = forwarded_headers(&options.headers, &config.forward_headers)?;
    let fetcher = HttpFetcher::new(&route_table, &header_map);
    let gateway = Gateway::new(Arc::new(schema), config.gateway_options());

    let response = tokio::select! {
        response = gateway.execute(&fetcher, request, options.error_mode) => response,
        _ = signal::ctrl_c() => {
            tracing::info!("Interrupted");
            return Ok(());
        }
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_allowed_headers() {
        let header_map = forwarded_headers(
            &[
                "Authorization: Bearer token".to_string(),
                "x-trace: 1".to_string(),
            ],
            &["authorization".to_string()],
        )
        .unwrap();
        assert_eq!(header_map.len(), 1);
        assert_eq!(header_map["authorization"], "Bearer token");
        assert!(forwarded_headers(&["broken".to_string()], &[]).is_err());
    }
}
