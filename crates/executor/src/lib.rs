#![forbid(unsafe_code)]

mod cache;
mod constants;
mod diagnostics;
mod error;
mod executor;
mod fetcher;
mod gateway;
mod introspection;
mod metrics;
mod propagation;
mod requirements;
mod result;
mod service_route;
mod visibility;

pub use cache::PlanCache;
pub use diagnostics::{ExecutionDiagnostics, NoopDiagnostics};
pub use error::{InvalidErrorMode, TransportError};
pub use executor::{ErrorMode, Executor, ExecutorOptions, TRANSPORT_ERROR_CODE};
pub use fetcher::{HttpFetcher, SourceSchemaClient};
pub use gateway::{Gateway, GatewayOptions};
pub use introspection::{IntrospectionResolver, NoIntrospection};
pub use requirements::{EntityBatch, VariableRequirementStore};
pub use result::{Location, ResultTree};
pub use service_route::{ServiceRoute, ServiceRouteTable};
pub use visibility::ConditionalVisibilitySet;
