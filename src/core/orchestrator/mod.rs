pub mod generator;
pub mod recover;
pub mod shaper;
pub mod textify;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::core::error::SmithResult;
use crate::core::models::{EndpointInfo, ParsedResponse, ScrapeRequest};
use crate::core::plan::GeneratedPlan;
use crate::core::registry::EndpointRegistry;
use crate::core::sandbox::{ExecutionResult, SandboxExecutor};
use self::generator::PlanGenerator;
use self::shaper::DataShaper;

/// Everything produced along one successful request-to-endpoint run.
#[derive(Debug)]
pub struct PublishOutcome {
    pub plan: GeneratedPlan,
    pub execution: ExecutionResult,
    pub parsed: ParsedResponse,
    pub endpoint: EndpointInfo,
}

/// Synchronous front-end entry point: drives generation, execution,
/// shaping and registration in order, failing with a typed error at
/// whichever stage breaks.
pub struct Pipeline {
    generator: PlanGenerator,
    executor: SandboxExecutor,
    shaper: DataShaper,
    registry: Arc<EndpointRegistry>,
    execution_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        generator: PlanGenerator,
        executor: SandboxExecutor,
        shaper: DataShaper,
        registry: Arc<EndpointRegistry>,
        execution_timeout: Duration,
    ) -> Self {
        Pipeline {
            generator,
            executor,
            shaper,
            registry,
            execution_timeout,
        }
    }

    pub async fn generate_and_publish(
        &self,
        request: &ScrapeRequest,
    ) -> SmithResult<PublishOutcome> {
        info!(description = %request.description, "pipeline started");

        let plan = self.generator.generate(request).await?;
        let execution = self
            .executor
            .execute_plan(&plan, self.execution_timeout)
            .await;
        let parsed = self.shaper.shape(&execution, request).await?;
        let endpoint = self.registry.create(&parsed, &request.description).await?;

        info!(
            endpoint_id = %endpoint.endpoint_id,
            records = parsed.meta.records_parsed,
            "pipeline published endpoint"
        );

        Ok(PublishOutcome {
            plan,
            execution,
            parsed,
            endpoint,
        })
    }
}
