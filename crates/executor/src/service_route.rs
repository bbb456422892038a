use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use futures_util::TryFutureExt;
use fusiongate_planner::{Request, Response};
use http::HeaderMap;
use once_cell::sync::Lazy;

use crate::TransportError;

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(Default::default);

/// Where a source schema is served.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ServiceRoute {
    /// Source schema address
    ///
    /// For example: 1.2.3.4:8000, example.com:8080
    pub addr: String,

    /// Use TLS
    pub tls: bool,

    /// GraphQL HTTP path, default is `/`.
    pub query_path: Option<String>,
}

impl ServiceRoute {
    pub fn url(&self) -> String {
        let scheme = match self.tls {
            true => "https",
            false => "http",
        };
        match &self.query_path {
            Some(path) => format!("{}://{}{}", scheme, self.addr, path),
            None => format!("{}://{}", scheme, self.addr),
        }
    }
}

/// Source schema routing table
///
/// The key is the source schema name.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct ServiceRouteTable(HashMap<String, ServiceRoute>);

impl Deref for ServiceRouteTable {
    type Target = HashMap<String, ServiceRoute>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for ServiceRouteTable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl ServiceRouteTable {
    /// Posts a GraphQL request to the specified source schema.
    pub async fn query(
        &self,
        schema: impl AsRef<str>,
        request: Request,
        header_map: Option<&HeaderMap>,
    ) -> Result<Response, TransportError> {
        let schema = schema.as_ref();
        let route = self
            .0
            .get(schema)
            .ok_or_else(|| TransportError::UnknownSchema(schema.to_string()))?;

        let raw_resp = HTTP_CLIENT
            .post(route.url())
            .headers(header_map.cloned().unwrap_or_default())
            .json(&request)
            .send()
            .and_then(|res| async move { res.error_for_status() })
            .await?;

        let headers = raw_resp
            .headers()
            .iter()
            .filter_map(|(key, val)| {
                val.to_str()
                    .ok()
                    .map(|val| (key.as_str().to_string(), val.to_string()))
            })
            .collect::<HashMap<_, _>>();

        let mut resp = raw_resp.json::<Response>().await?;
        resp.headers = Some(headers);
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_url() {
        let route = ServiceRoute {
            addr: "localhost:8001".to_string(),
            tls: false,
            query_path: None,
        };
        assert_eq!(route.url(), "http://localhost:8001");

        let route = ServiceRoute {
            addr: "books.example.com".to_string(),
            tls: true,
            query_path: Some("/graphql".to_string()),
        };
        assert_eq!(route.url(), "https://books.example.com/graphql");
    }

    #[tokio::test]
    async fn unknown_schema() {
        let table = ServiceRouteTable::default();
        let err = table
            .query("books", Request::new("{ books { id } }"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownSchema(name) if name == "books"));
    }
}
