//! Run orchestration: the phased workload generator, adaptive rate search,
//! backlog build/drain and result assembly.
mod backlog;
mod generator;
mod plan;
mod rate_search;
mod results;
mod workload;


use std::sync::Arc;

use tracing::{info, warn};

use crate::error::AppResult;
use crate::worker::Worker;

pub use backlog::{BacklogManager, DRAINED_BACKLOG, DrainOutcome};
pub use generator::WorkloadGenerator;
pub use plan::{RunPlan, Timings};
pub use rate_search::{INITIAL_PROBE_RATE, MIN_SEARCH_RATE, RateDecision, RateSearch};
pub use results::{
    AggregateResult, RunMetadata, SnapshotResult, TestDetails, TestResult, camel_case_tag,
    default_output_prefix, result_paths, result_timestamp, write_results,
};
pub use workload::Workload;

/// Executes one benchmark run end to end against `worker`.
///
/// Leftover load from an earlier run is stopped first, the driver is
/// initialized, the workload runs, and on success the details are enriched
/// with driver and workload metadata.
///
/// # Errors
///
/// Returns an error if the plan is invalid, the driver cannot be initialized,
/// or any run phase fails. Workers are stopped in every case.
pub async fn execute_run(worker: Arc<dyn Worker>, plan: RunPlan) -> AppResult<TestResult> {
    let generator = WorkloadGenerator::new(Arc::clone(&worker), plan)?;
    let plan = generator.plan();
    info!(
        "Starting run {} of workload '{}' on driver '{}' ({})",
        plan.run_id, plan.workload.name, plan.driver.name, plan.driver.driver
    );

    worker.stop_all().await?;
    if let Err(err) = worker.initialize_driver(&plan.driver).await {
        if let Err(stop_err) = worker.stop_all().await {
            warn!("Failed to stop workers: {}", stop_err);
        }
        return Err(err);
    }

    let mut result = generator.run().await?;
    enrich_details(&mut result.details, plan);
    info!(
        "Run {} finished with {} snapshots",
        plan.run_id,
        result.snapshots.len()
    );
    Ok(result)
}

fn enrich_details(details: &mut TestDetails, plan: &RunPlan) {
    details.test_name.clone_from(&plan.test_name);
    details.test_suite_name.clone_from(&plan.test_suite_name);
    details.product.clone_from(&plan.driver.product);
    details.sku.clone_from(&plan.driver.sku);
    details.protocol.clone_from(&plan.driver.protocol);
    details.metadata = Some(RunMetadata::describe(
        &plan.workload,
        &plan.driver,
        &plan.tags,
    ));
}
