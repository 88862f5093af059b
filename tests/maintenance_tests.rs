//! Priority aging and stuck-job reclaim against a real store.

mod test_utils;

use chrono::{Duration, Utc};
use crawler_scheduler::aging::AgingSweeper;
use crawler_scheduler::config::MaintenanceConfig;
use crawler_scheduler::models::JobStatus;
use crawler_scheduler::reclaimer::StuckJobReclaimer;
use rand::SeedableRng;
use rand::rngs::StdRng;
use test_utils::{attempt, enqueue, setup_job_repository};

#[tokio::test]
async fn aging_boosts_long_waiting_jobs_once_per_threshold() {
    let jobs = setup_job_repository().await.unwrap();
    let sweeper = AgingSweeper::new(jobs.clone(), &MaintenanceConfig::default());
    let job = enqueue(&jobs, "slow-subject", 40).await;
    let start = Utc::now();

    // Too young to age.
    assert_eq!(sweeper.tick(start + Duration::minutes(30)).await.unwrap(), 0);
    assert_eq!(jobs.get(job.id).await.unwrap().priority, 40);

    let first = start + Duration::minutes(61);
    assert_eq!(sweeper.tick(first).await.unwrap(), 1);
    let aged = jobs.get(job.id).await.unwrap();
    assert_eq!(aged.priority, 50);
    assert!(aged.aged_at.is_some());

    // Same instant again: boosted too recently.
    assert_eq!(sweeper.tick(first).await.unwrap(), 0);
    assert_eq!(jobs.get(job.id).await.unwrap().priority, 50);

    assert_eq!(sweeper.tick(start + Duration::minutes(122)).await.unwrap(), 1);
    assert_eq!(jobs.get(job.id).await.unwrap().priority, 60);
}

#[tokio::test]
async fn aging_caps_at_max_and_skips_non_queued_jobs() {
    let jobs = setup_job_repository().await.unwrap();
    let sweeper = AgingSweeper::new(jobs.clone(), &MaintenanceConfig::default());

    let near_top = enqueue(&jobs, "near-top", 95).await;
    let at_top = enqueue(&jobs, "at-top", 100).await;
    let failed = enqueue(&jobs, "failed", 10).await;
    jobs.update_status(failed.id, JobStatus::Failed).await.unwrap();

    let later = Utc::now() + Duration::hours(2);
    assert_eq!(sweeper.tick(later).await.unwrap(), 1);

    assert_eq!(jobs.get(near_top.id).await.unwrap().priority, 100);
    assert_eq!(jobs.get(at_top.id).await.unwrap().priority, 100);
    assert_eq!(jobs.get(failed.id).await.unwrap().priority, 10);
}

#[tokio::test]
async fn reclaimer_requeues_stuck_jobs_without_spending_a_retry() {
    let jobs = setup_job_repository().await.unwrap();
    let reclaimer = StuckJobReclaimer::new(jobs.clone(), &MaintenanceConfig::default());

    let job = enqueue(&jobs, "hung", 20).await;

    // One real failure first so there is a retry count to preserve.
    let first = jobs.claim_next(Utc::now()).await.unwrap().unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    jobs.mark_failure_with_rng(job.id, attempt(&first), Some(1), "boom", Utc::now(), &mut rng)
        .await
        .unwrap();
    let claimed_at = Utc::now() + Duration::hours(1);
    let claimed = jobs.claim_next(claimed_at).await.unwrap().unwrap();
    assert_eq!(claimed.retry_count, 1);

    let last_attempt = claimed.last_attempt_at.unwrap().with_timezone(&Utc);
    assert_eq!(
        reclaimer.tick(last_attempt + Duration::minutes(10)).await.unwrap(),
        0
    );

    let reclaim_at = last_attempt + Duration::minutes(31);
    assert_eq!(reclaimer.tick(reclaim_at).await.unwrap(), 1);

    let reclaimed = jobs.get(job.id).await.unwrap();
    assert_eq!(reclaimed.status, "queued");
    assert_eq!(reclaimed.retry_count, 1);
    assert!(reclaimed.visible_at.with_timezone(&Utc) <= reclaim_at);

    let again = jobs.claim_next(reclaim_at).await.unwrap().unwrap();
    assert_eq!(again.id, job.id);
}

#[tokio::test]
async fn reclaimer_ignores_queued_and_finished_jobs() {
    let jobs = setup_job_repository().await.unwrap();
    let reclaimer = StuckJobReclaimer::new(jobs.clone(), &MaintenanceConfig::default());

    enqueue(&jobs, "waiting", 0).await;
    let done = enqueue(&jobs, "done", 90).await;
    let claimed = jobs.claim_next(Utc::now()).await.unwrap().unwrap();
    jobs.mark_success(done.id, attempt(&claimed), 12).await.unwrap();

    assert_eq!(
        reclaimer.tick(Utc::now() + Duration::days(1)).await.unwrap(),
        0
    );
    let stats = jobs.stats().await.unwrap();
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.success, 1);
}
