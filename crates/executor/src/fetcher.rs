use fusiongate_planner::{Request, Response};
use http::HeaderMap;
use tokio_util::sync::CancellationToken;

use crate::{ServiceRouteTable, TransportError};

/// Delivers rendered operations to source schemas.
#[async_trait::async_trait]
pub trait SourceSchemaClient: Send + Sync {
    async fn send(
        &self,
        schema: &str,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError>;
}

/// Sends requests over HTTP with the headers forwarded from the client request.
pub struct HttpFetcher<'a> {
    route_table: &'a ServiceRouteTable,
    header_map: &'a HeaderMap,
}

impl<'a> HttpFetcher<'a> {
    pub fn new(route_table: &'a ServiceRouteTable, header_map: &'a HeaderMap) -> Self {
        Self {
            route_table,
            header_map,
        }
    }
}

#[async_trait::async_trait]
impl<'a> SourceSchemaClient for HttpFetcher<'a> {
    async fn send(
        &self,
        schema: &str,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        tokio::select! {
            res = self.route_table.query(schema, request, Some(self.header_map)) => res,
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
        }
    }
}
