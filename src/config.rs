use std::time::Duration;

use fusiongate_executor::{
    ErrorMode, ExecutorOptions, GatewayOptions, ServiceRoute, ServiceRouteTable,
};
use fusiongate_planner::SchemaSelectionPolicy;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub addr: String,
    #[serde(default)]
    pub tls: bool,
    pub query_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    #[serde(default)]
    pub forward_headers: Vec<String>,

    #[serde(default)]
    pub error_mode: ErrorMode,

    #[serde(default)]
    pub allow_error_mode_override: bool,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Request timeout in milliseconds.
    #[serde(default)]
    pub request_timeout: Option<u64>,

    #[serde(default = "default_plan_cache_size")]
    pub plan_cache_size: usize,

    #[serde(default)]
    pub expose_operation_plan: bool,

    #[serde(default)]
    pub planner: SchemaSelectionPolicy,
}

impl Config {
    pub fn create_route_table(&self) -> ServiceRouteTable {
        let mut route_table = ServiceRouteTable::default();
        for service in &self.services {
            route_table.insert(
                service.name.clone(),
                ServiceRoute {
                    addr: service.addr.clone(),
                    tls: service.tls,
                    query_path: service.query_path.clone(),
                },
            );
        }
        route_table
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            executor: ExecutorOptions {
                error_mode: self.error_mode,
                max_concurrency: self.max_concurrency,
                timeout: self.request_timeout.map(Duration::from_millis),
            },
            allow_error_mode_override: self.allow_error_mode_override,
            plan_cache_size: self.plan_cache_size,
            expose_operation_plan: self.expose_operation_plan,
            policy: self.planner.clone(),
        }
    }
}

fn default_max_concurrency() -> usize {
    16
}

fn default_plan_cache_size() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config() {
        let config = toml::from_str::<Config>(
            r#"
            forward_headers = ["authorization"]
            error_mode = "null"
            request_timeout = 1500

            [[services]]
            name = "products"
            addr = "127.0.0.1:8001"

            [[services]]
            name = "reviews"
            addr = "reviews.example.com"
            tls = true
            query_path = "/graphql"

            [planner]
            priority = ["reviews"]
            "#,
        )
        .unwrap();

        let route_table = config.create_route_table();
        assert_eq!(route_table.len(), 2);
        assert_eq!(route_table["reviews"].url(), "https://reviews.example.com/graphql");

        let options = config.gateway_options();
        assert_eq!(options.executor.error_mode, ErrorMode::Null);
        assert_eq!(options.executor.max_concurrency, 16);
        assert_eq!(options.executor.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.plan_cache_size, 256);
        assert!(options.policy.prefer_parent);
        assert_eq!(options.policy.priority, vec!["reviews".to_string()]);
    }

    #[test]
    fn empty_config() {
        let config = toml::from_str::<Config>("").unwrap();
        assert!(config.services.is_empty());
        assert_eq!(config.error_mode, ErrorMode::Propagate);
        assert_eq!(config.request_timeout, None);
        assert!(!config.expose_operation_plan);
    }
}
