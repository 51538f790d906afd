use super::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const TICK: Duration = Duration::from_millis(10);

/// Body that records how many instances of itself run at once
fn overlap_tracker(
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    ticks: Arc<AtomicUsize>,
) -> TaskSpec {
    TaskSpec::new("tracked", TICK, move || {
        let (active, peak, ticks) = (active.clone(), peak.clone(), ticks.clone());
        async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(15)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

#[tokio::test]
async fn restart_never_overlaps_ticks() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let ticks = Arc::new(AtomicUsize::new(0));
    let supervisor = Arc::new(TaskSupervisor::new(vec![overlap_tracker(
        active.clone(),
        peak.clone(),
        ticks.clone(),
    )]));

    supervisor.start().await;
    let restarts = (0..10).map(|i| {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3 * i)).await;
            supervisor.restart("tracked").await
        })
    });
    for handle in restarts {
        handle.await.unwrap().unwrap();
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    supervisor.stop_all().await;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(ticks.load(Ordering::SeqCst) >= 1);
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failing_body_keeps_the_loop_alive() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let supervisor = TaskSupervisor::new(vec![TaskSpec::new("flaky", TICK, move || {
        let counter = counter.clone();
        async move {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(Error::StoreQuery("down".into())),
                1 => panic!("boom"),
                _ => Ok(()),
            }
        }
    })]);

    supervisor.start().await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    let status = supervisor.get_status()["flaky"].clone();
    supervisor.stop_all().await;

    assert!(calls.load(Ordering::SeqCst) >= 3);
    assert_eq!(status.state, TaskState::Running);
    assert_eq!(status.failures, 2);
    assert!(status.last_error.unwrap().contains("panicked"));
    assert!(status.last_success.is_some());
}

#[tokio::test]
async fn stop_all_waits_for_the_current_tick() {
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let (s, f) = (started.clone(), finished.clone());
    let slow = TaskSpec::new("slow", Duration::from_secs(60), move || {
        let (s, f) = (s.clone(), f.clone());
        async move {
            s.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            f.store(true, Ordering::SeqCst);
            Ok(())
        }
    });
    let supervisor = TaskSupervisor::new(vec![slow]);

    supervisor.start().await;
    while !started.load(Ordering::SeqCst) {
        tokio::task::yield_now().await;
    }
    supervisor.stop_all().await;

    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(supervisor.get_status()["slow"].state, TaskState::Stopped);
}

#[tokio::test]
async fn first_tick_runs_immediately() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let hourly = TaskSpec::new("hourly", Duration::from_secs(3600), move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    let supervisor = TaskSupervisor::new(vec![hourly]);

    supervisor.start().await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    supervisor.stop("hourly").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.get_status()["hourly"].ticks, 1);
}

#[tokio::test]
async fn ensure_running_starts_only_idle_tasks() {
    let supervisor = TaskSupervisor::new(vec![TaskSpec::new("idle", TICK, || async { Ok(()) })]);

    assert!(supervisor.ensure_running("idle").await.unwrap());
    assert!(!supervisor.ensure_running("idle").await.unwrap());
    supervisor.stop("idle").await.unwrap();
    assert!(!supervisor.get_status()["idle"].is_running());
    assert!(supervisor.ensure_running("idle").await.unwrap());
    supervisor.stop_all().await;
}

#[tokio::test]
async fn unknown_task_names_are_rejected() {
    let supervisor = TaskSupervisor::new(Vec::new());

    assert!(matches!(supervisor.restart("nope").await, Err(Error::NotFound(_))));
    assert!(matches!(supervisor.stop("nope").await, Err(Error::NotFound(_))));
    assert!(matches!(supervisor.ensure_running("nope").await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn status_is_readable_during_lifecycle_changes() {
    let supervisor = Arc::new(TaskSupervisor::new(vec![TaskSpec::new("busy", TICK, || async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(())
    })]));
    supervisor.start().await;

    let restarter = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.restart("busy").await })
    };
    // restart holds the lifecycle lock while waiting for the tick; status
    // reads must not wait on it
    for _ in 0..20 {
        let status = supervisor.get_status();
        assert!(status.contains_key("busy"));
        tokio::task::yield_now().await;
    }
    restarter.await.unwrap().unwrap();
    supervisor.stop_all().await;
}

#[tokio::test]
async fn builtin_tasks_register_under_their_names() {
    use crate::cache::MemoryCache;
    use crate::config::Config;
    use crate::testing::MemoryEventStore;

    let ctx = Arc::new(
        AppContext::new(
            Config::default(),
            Arc::new(MemoryEventStore::default()),
            Arc::new(MemoryCache::new()),
        )
        .unwrap(),
    );
    let supervisor = TaskSupervisor::from_context(&ctx);

    let names: Vec<_> = supervisor.task_names().collect();
    assert_eq!(names, vec!["cache_cleanup", "health_check", "stats_refresh", "violation_polling"]);

    supervisor.start().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = supervisor.get_status();
    supervisor.stop_all().await;

    assert!(status.values().all(|s| s.ticks >= 1 && s.failures == 0), "{:?}", status);
}
