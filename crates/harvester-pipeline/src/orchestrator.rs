//! Stage sequencing for one harvest run.
//!
//! Stages run in order, each internally parallel. Whatever happens in
//! stages 0–5 (failures, empty input, interruption, deadline), the run ends
//! with a flush of everything buffered.

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use harvester_core::{
    Combination, DetailEndpoint, DetailRequest, ExportFinalizer, IdExtractor,
    IdentityResolver, ListEndpoint, PageControl, PaginatedFetcher, PaginationEnd, Payload,
    Period, ProgressContext, RateLimiters, ReferenceSource, ResolvedId, ResultBuffer,
    SharedProgress, SourceRef, StageExecutor, StageTally, StopSignal, StorageSink, TaskError,
    fmt_num, panic_message, retry_with_backoff,
};

use crate::config::HarvestConfig;
use crate::report::{RunReport, StageStatus, StageSummary};
use crate::stage::{RunState, Stage, StageTarget};

/// The registry endpoints a run talks to
#[derive(Clone)]
pub struct Registry {
    pub reference: Arc<dyn ReferenceSource>,
    pub list: Arc<dyn ListEndpoint>,
    /// Stage 2: item details carrying the ids to resolve
    pub resolve: Arc<dyn DetailEndpoint>,
    pub extractor: Arc<dyn IdExtractor>,
    /// Stage 3: independent item details
    pub item_details: Arc<dyn DetailEndpoint>,
    /// Stages 4 and 5: details per resolved id
    pub resolved_details: [Arc<dyn DetailEndpoint>; 2],
}

/// Mutable state owned by one run
struct RunContext {
    stop: StopSignal,
    resolver: IdentityResolver,
    buffer: ResultBuffer,
    limiters: RateLimiters,
    period: Period,
}

pub struct Orchestrator {
    config: HarvestConfig,
    registry: Registry,
    sink: Arc<dyn StorageSink>,
    target: StageTarget,
    run_id: String,
    shutdown: Arc<AtomicBool>,
    progress: SharedProgress,
}

/// Timestamp-based run identifier, e.g. `20250301T120000Z`
pub fn new_run_id() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

impl Orchestrator {
    pub fn new(config: HarvestConfig, registry: Registry, sink: Arc<dyn StorageSink>) -> Self {
        Self {
            config,
            registry,
            sink,
            target: StageTarget::All,
            run_id: new_run_id(),
            shutdown: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(ProgressContext::hidden()),
        }
    }

    pub fn with_target(mut self, target: StageTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Flag checked before each page and task claim; set it to stop the run early
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Execute the run. Never fails: problems are recorded in the report.
    pub fn run(&self) -> RunReport {
        let start = Instant::now();
        if let Err(e) = self.config.validate() {
            log::error!("Configuration error: {e}");
            return RunReport::aborted(&self.run_id, self.target, e.to_string());
        }

        let ctx = RunContext {
            stop: StopSignal::new(self.shutdown.clone(), self.config.total_run_timeout()),
            resolver: IdentityResolver::new(self.config.primary_map_capacity),
            buffer: ResultBuffer::new(),
            limiters: RateLimiters::new(
                self.config.default_requests_per_second,
                self.config.requests_per_second.clone(),
            ),
            period: self
                .config
                .period_or_default(chrono::Local::now().date_naive()),
        };
        let mut report = RunReport::new(&self.run_id, self.target);
        log::info!(
            "Run {} starting: target={}, workers={}, capacity={}",
            self.run_id,
            self.target,
            self.config.max_workers_per_stage,
            self.config
                .primary_map_capacity
                .map_or_else(|| "unbounded".to_string(), fmt_num),
        );

        self.run_stages(&ctx, &mut report);
        report.stopped = ctx.stop.check();
        self.finalize(&ctx, &mut report);

        report.primary_entries = ctx.resolver.primary_len();
        let reverse = ctx.resolver.reverse_snapshot();
        report.resolved_ids = reverse.len();
        report.shared_ids = reverse.iter().filter(|(_, sources)| sources.len() > 1).count();
        report.elapsed = start.elapsed();
        report
    }

    fn run_stages(&self, ctx: &RunContext, report: &mut RunReport) {
        let required = self.target.required_stages();
        let mut combinations: Vec<Combination> = Vec::new();

        for stage in Stage::ALL {
            if stage == Stage::Finalize {
                break;
            }
            if !required.contains(&stage) {
                report.stages.push(StageSummary::new(stage, StageStatus::NotSelected));
                continue;
            }
            if let Some(reason) = ctx.stop.check() {
                log::warn!("{stage}: not started ({reason})");
                report.stages.push(StageSummary::new(stage, StageStatus::Skipped(reason)));
                continue;
            }

            // Whatever a stage buffered before panicking stays for finalize
            let ran = panic::catch_unwind(AssertUnwindSafe(|| match stage {
                Stage::Combinations => {
                    let (summary, loaded) = self.load_combinations(ctx);
                    combinations = loaded;
                    summary
                }
                Stage::Primary => self.build_primary_map(ctx, &combinations),
                Stage::Resolve => self.resolve_ids(ctx),
                Stage::ItemDetails => self.fetch_item_details(ctx),
                Stage::ResolvedDetailsA => self.fetch_resolved_details(ctx, Stage::ResolvedDetailsA, 0),
                Stage::ResolvedDetailsB => self.fetch_resolved_details(ctx, Stage::ResolvedDetailsB, 1),
                Stage::Finalize => StageSummary::new(stage, StageStatus::NotSelected),
            }));
            match ran {
                Ok(summary) => {
                    summary.log();
                    report.stages.push(summary);
                    advance(&mut report.reached, stage, &required);
                }
                Err(panic) => {
                    let summary = StageSummary::new(stage, StageStatus::Panicked(panic_message(panic.as_ref())));
                    summary.log();
                    report.stages.push(summary);
                }
            }
        }
    }

    /// Stage 0
    fn load_combinations(&self, ctx: &RunContext) -> (StageSummary, Vec<Combination>) {
        let start = Instant::now();
        let reference = &self.registry.reference;
        let op = reference.operation();
        let limiter = ctx.limiters.for_class(op);
        let mut tally = StageTally {
            submitted: 1,
            ..Default::default()
        };

        let mut combinations =
            match retry_with_backoff(op, &self.config.retry, &limiter, || reference.list_combinations()) {
                Ok(list) => {
                    tally.succeeded = 1;
                    if let Some(raw) = list.raw {
                        ctx.buffer.append(op, raw);
                    }
                    list.combinations
                }
                Err(e) => {
                    tally.failed = 1;
                    log::error!("{op}: cannot load combinations: {e}");
                    Vec::new()
                }
            };

        let total = combinations.len();
        if !self.config.category_filter.is_empty() {
            combinations.retain(|c| self.config.category_filter.contains(&c.category_code));
            log::info!(
                "Category filter kept {}/{} combinations",
                combinations.len(),
                total
            );
        }
        if combinations.is_empty() {
            log::warn!("No combinations to harvest");
        } else {
            log::info!("Loaded {} combinations", combinations.len());
        }

        (StageSummary::completed(Stage::Combinations, tally, start.elapsed()), combinations)
    }

    /// Stage 1: combinations are paginated one after another so the
    /// capacity cut-off is deterministic.
    fn build_primary_map(&self, ctx: &RunContext, combinations: &[Combination]) -> StageSummary {
        if combinations.is_empty() {
            return StageSummary::new(Stage::Primary, StageStatus::NoInput);
        }
        let start = Instant::now();
        let list = self.registry.list.as_ref();
        let op = list.operation();
        let fetcher = PaginatedFetcher::new(
            list,
            ctx.limiters.for_class(op),
            self.config.retry,
            self.config.page_size,
        )
        .with_max_pages(self.config.max_pages_per_partition);
        let line = self.progress.stage_line(Stage::Primary.name());

        let mut tally = StageTally {
            submitted: combinations.len(),
            ..Default::default()
        };
        let mut skipped = 0;

        for (i, combo) in combinations.iter().enumerate() {
            if ctx.resolver.is_full() {
                skipped = combinations.len() - i;
                log::info!(
                    "Primary map full ({} entries), skipping {skipped} remaining combinations",
                    fmt_num(ctx.resolver.primary_len())
                );
                break;
            }
            if let Some(reason) = ctx.stop.check() {
                tally.not_started = combinations.len() - i;
                log::warn!("{}: {} combinations not started ({reason})", Stage::Primary, tally.not_started);
                break;
            }

            line.set_message(format!("{combo} ({}/{})", i + 1, combinations.len()));
            let mut inserted = 0usize;
            let outcome = fetcher.paginate(combo, &ctx.stop, |page| {
                if let Some(raw) = &page.raw {
                    ctx.buffer.append(op, raw.clone());
                }
                for item in &page.items {
                    if ctx.resolver.add_primary(item.clone(), combo.category_code.clone()) {
                        inserted += 1;
                    }
                }
                if ctx.resolver.is_full() {
                    PageControl::Stop
                } else {
                    PageControl::Continue
                }
            });

            match outcome.end {
                PaginationEnd::Failed(_) | PaginationEnd::Interrupted(_) => tally.failed += 1,
                _ => tally.succeeded += 1,
            }
            log::debug!(
                "{combo}: {} pages, {} items, {inserted} new primary entries ({})",
                outcome.pages,
                outcome.items_seen,
                outcome.end
            );
        }
        line.finish_and_clear();

        log::info!("Primary map: {} entries", fmt_num(ctx.resolver.primary_len()));
        StageSummary {
            skipped,
            ..StageSummary::completed(Stage::Primary, tally, start.elapsed())
        }
    }

    /// Stage 2: item details → resolved ids → reverse map
    fn resolve_ids(&self, ctx: &RunContext) -> StageSummary {
        let tasks = ctx.resolver.primary_snapshot();
        if tasks.is_empty() {
            return StageSummary::new(Stage::Resolve, StageStatus::NoInput);
        }
        let start = Instant::now();
        let endpoint = self.registry.resolve.as_ref();
        let extractor = self.registry.extractor.as_ref();

        let results = self.executor(ctx, Stage::Resolve).run(tasks, |src: &SourceRef| {
            let request = DetailRequest::new(src.key.as_str()).with_context(src.value.clone());
            let payload = self.fetch_detail(ctx, endpoint, &request)?;
            let ids = extractor.extract(&payload);
            // Raw response is kept even when no id can be extracted from it
            ctx.buffer.append(endpoint.operation(), payload);
            let ids = ids?;
            for id in &ids {
                ctx.resolver.add_reverse(id.clone(), src.clone());
            }
            Ok(ids.len())
        });

        log::info!("Resolved {} distinct ids", fmt_num(ctx.resolver.reverse_len()));
        StageSummary::completed(Stage::Resolve, StageTally::from_results(&results), start.elapsed())
    }

    /// Stage 3
    fn fetch_item_details(&self, ctx: &RunContext) -> StageSummary {
        let tasks = ctx.resolver.primary_snapshot();
        if tasks.is_empty() {
            return StageSummary::new(Stage::ItemDetails, StageStatus::NoInput);
        }
        let start = Instant::now();
        let endpoint = self.registry.item_details.as_ref();

        let results = self.executor(ctx, Stage::ItemDetails).run(tasks, |src: &SourceRef| {
            let request = DetailRequest::new(src.key.as_str()).with_context(src.value.clone());
            let payload = self.fetch_detail(ctx, endpoint, &request)?;
            ctx.buffer.append(endpoint.operation(), payload);
            Ok(())
        });

        StageSummary::completed(Stage::ItemDetails, StageTally::from_results(&results), start.elapsed())
    }

    /// Stages 4 and 5
    fn fetch_resolved_details(&self, ctx: &RunContext, stage: Stage, which: usize) -> StageSummary {
        let tasks = ctx.resolver.reverse_keys();
        if tasks.is_empty() {
            return StageSummary::new(stage, StageStatus::NoInput);
        }
        let start = Instant::now();
        let endpoint = self.registry.resolved_details[which].as_ref();

        let results = self.executor(ctx, stage).run(tasks, |id: &ResolvedId| {
            let request = DetailRequest::new(id.as_str()).with_period(Some(ctx.period));
            let payload = self.fetch_detail(ctx, endpoint, &request)?;
            ctx.buffer.append(endpoint.operation(), payload);
            Ok(())
        });

        StageSummary::completed(stage, StageTally::from_results(&results), start.elapsed())
    }

    /// Stage 6: flush everything buffered, then the manifest sidecar
    fn finalize(&self, ctx: &RunContext, report: &mut RunReport) {
        let finalizer = ExportFinalizer::new(self.sink.as_ref(), &self.run_id);
        let pending = ctx.buffer.total();
        log::info!("Finalizing run {}: {} buffered records", self.run_id, fmt_num(pending));

        let manifest = finalizer.flush(&ctx.buffer);
        if !manifest.is_empty() {
            match finalizer.write_manifest(&manifest) {
                Ok(path) => report.manifest_path = Some(path),
                Err(e) => {
                    log::error!("Cannot write manifest: {e}");
                    report.manifest_error = Some(e.to_string());
                }
            }
        }
        if !ctx.buffer.is_empty() {
            log::warn!(
                "{} records remain buffered after failed writes",
                fmt_num(ctx.buffer.total())
            );
        }
        report.manifest = Some(manifest);
        report.state = RunState::Finalized;
    }

    fn executor<'a>(&self, ctx: &'a RunContext, stage: Stage) -> StageExecutor<'a> {
        StageExecutor::new(stage.name(), self.config.max_workers_per_stage)
            .with_stop(&ctx.stop)
            .with_progress(self.progress.stage_bar(stage.name()), self.config.progress_every)
    }

    fn fetch_detail(
        &self,
        ctx: &RunContext,
        endpoint: &dyn DetailEndpoint,
        request: &DetailRequest,
    ) -> Result<Payload, TaskError> {
        let op = endpoint.operation();
        let limiter = ctx.limiters.for_class(op);
        let label = format!("{op} {request}");
        retry_with_backoff(&label, &self.config.retry, &limiter, || endpoint.fetch(request))
            .map_err(TaskError::from)
    }
}

/// Move the run state forward once the last stage of a state's group has run
fn advance(reached: &mut RunState, finished: Stage, required: &BTreeSet<Stage>) {
    let last_detail_stage = required
        .iter()
        .copied()
        .filter(|s| *s > Stage::Primary && *s < Stage::Finalize)
        .max();
    let next = match finished {
        Stage::Combinations => RunState::CombinationsLoaded,
        Stage::Primary => RunState::PrimaryMapBuilt,
        s if Some(s) == last_detail_stage => RunState::DetailsResolved,
        _ => return,
    };
    log::debug!("state: {reached} -> {next}");
    *reached = next;
}
