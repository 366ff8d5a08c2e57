//! Worker: the fetch+parse+extract unit the scheduler orchestrates
//!
//! One invocation handles one claimed task end to end: robots gate,
//! middleware pipeline (which performs rate-limit acquisition), fetch with
//! retries, parse/extract, re-offering discovered links, and exactly one
//! sink delivery for every page that produced a result. Page-local errors
//! become failed results; only cancellation and robots denials end a task
//! without a result.

use crate::extract::{Extractor, PageData};
use crate::fetch::Fetcher;
use crate::frontier::{CrawlTask, Frontier, OfferOutcome, TaskDisposition};
use crate::limiter::RateLimiter;
use crate::middleware::{CrawlRequest, CrawlResponse, MiddlewarePipeline, RequestFlow};
use crate::robots::RobotsRegistry;
use crate::sink::{CrawlResult, Sink};
use crate::stats::CrawlStats;
use crate::url::origin_of;
use crate::{CrawlError, ErrorCategory};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Everything a worker needs, shared across all workers of a crawl
pub struct WorkerContext {
    pub frontier: Arc<Frontier>,
    pub pipeline: MiddlewarePipeline,
    pub fetcher: Arc<Fetcher>,
    pub robots: Arc<RobotsRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub extractor: Arc<Extractor>,
    pub sink: Arc<dyn Sink>,
    pub stats: Arc<CrawlStats>,
    pub cancel: CancellationToken,
    /// Origins whose robots verdict has already been recorded this run
    pub robots_recorded: Mutex<HashSet<String>>,
}

/// Runs one task to completion and settles it with the frontier
pub async fn run_task(ctx: Arc<WorkerContext>, task: CrawlTask) {
    let disposition = process(ctx.as_ref(), &task).await;
    ctx.frontier.complete(&task, disposition);
}

async fn process(ctx: &WorkerContext, task: &CrawlTask) -> TaskDisposition {
    if ctx.cancel.is_cancelled() {
        return TaskDisposition::Skipped;
    }

    // Robots gate; the verdict's crawl delay feeds the rate limiter before
    // any fetch to the origin.
    let verdict = ctx.robots.check(&task.url).await;
    if let Some(origin) = origin_of(&task.url) {
        ctx.limiter
            .set_crawl_delay(&origin, verdict.crawl_delay)
            .await;
        let first_sighting = ctx
            .robots_recorded
            .lock()
            .expect("robots record lock poisoned")
            .insert(origin.clone());
        if first_sighting {
            ctx.frontier.record_robots(
                origin,
                verdict.crawl_delay.map(|d| d.as_millis() as u64),
            );
        }
    }
    if !verdict.allowed {
        ctx.stats.record_robots_denied();
        tracing::debug!("Skipping {} (disallowed by robots.txt)", task.url);
        return TaskDisposition::Skipped;
    }

    let mut request = CrawlRequest::get(task.url.clone(), task.depth);
    request.metadata = task.metadata.clone();

    match execute(ctx, request).await {
        Ok(response) => emit_page(ctx, task, &response),
        Err(CrawlError::Cancelled) => TaskDisposition::Skipped,
        Err(error) => match error.category() {
            Some(category) => emit_failure(ctx, task, category),
            None => {
                tracing::error!("Task for {} failed fatally: {}", task.url, error);
                TaskDisposition::Skipped
            }
        },
    }
}

/// Middleware + fetch, with exception hooks resuming at response
/// post-processing when they synthesize a response
async fn execute(ctx: &WorkerContext, request: CrawlRequest) -> Result<CrawlResponse, CrawlError> {
    let original = request.clone();

    let (request, response) = match ctx.pipeline.run_request(request).await {
        Ok(RequestFlow::Continue(request)) => {
            match ctx.fetcher.fetch(&request, &ctx.cancel).await {
                Ok(response) => (request, response),
                Err(error) => return recover(ctx, error, &request).await,
            }
        }
        Ok(RequestFlow::ShortCircuit(response)) => (original, response),
        Ok(RequestFlow::Abort) => unreachable!("run_request maps Abort to an error"),
        Err(error) => return recover(ctx, error, &original).await,
    };

    match ctx.pipeline.run_response(response, &request).await {
        Ok(response) => Ok(response),
        Err(error) => recover(ctx, error, &request).await,
    }
}

async fn recover(
    ctx: &WorkerContext,
    error: CrawlError,
    request: &CrawlRequest,
) -> Result<CrawlResponse, CrawlError> {
    if matches!(error, CrawlError::Cancelled) {
        return Err(error);
    }
    match ctx.pipeline.run_exception(&error, request).await {
        Some(response) => ctx.pipeline.run_response(response, request).await,
        None => Err(error),
    }
}

/// Parses the response, re-offers discovered links, and delivers the
/// result. Parsing and extraction run synchronously so the DOM never
/// crosses an await point.
fn emit_page(ctx: &WorkerContext, task: &CrawlTask, response: &CrawlResponse) -> TaskDisposition {
    let page = ctx.extractor.process(response);
    let error = (response.status >= 400).then_some(ErrorCategory::Response);

    // Links on error pages are not followed.
    if error.is_none() {
        offer_links(ctx, task, &page);
    }

    let failed = error.is_some();
    ctx.sink.deliver(CrawlResult {
        page,
        depth: task.depth,
        parent_url: task.parent.clone(),
        error,
    });
    ctx.stats.record_page(failed);

    if failed {
        TaskDisposition::Failed
    } else {
        TaskDisposition::Emitted
    }
}

fn emit_failure(ctx: &WorkerContext, task: &CrawlTask, category: ErrorCategory) -> TaskDisposition {
    ctx.sink.deliver(CrawlResult {
        page: PageData::failure(task.url.to_string(), None, category),
        depth: task.depth,
        parent_url: task.parent.clone(),
        error: Some(category),
    });
    ctx.stats.record_page(true);
    TaskDisposition::Failed
}

fn offer_links(ctx: &WorkerContext, task: &CrawlTask, page: &PageData) {
    let (mut accepted, mut duplicate, mut filtered) = (0u64, 0u64, 0u64);
    for link in &page.links {
        match ctx
            .frontier
            .offer(link, task.depth + 1, Some(page.url.clone()), None)
        {
            OfferOutcome::Accepted => accepted += 1,
            OfferOutcome::Duplicate => duplicate += 1,
            OfferOutcome::Filtered(_) | OfferOutcome::TooDeep | OfferOutcome::Draining => {
                filtered += 1
            }
        }
    }
    ctx.stats
        .record_links(page.links.len() as u64, accepted, duplicate, filtered);
}
