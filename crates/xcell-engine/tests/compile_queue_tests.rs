//! Integration tests for the compile queue
//!
//! Ordering, draining and failure isolation, all driven inside a `LocalSet`.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::LocalSet;
use xcell_engine::{CompileError, CompileQueue, JsxOptions, JsxTransformer, Transformer};

/// Uppercases its input; sources starting with `slow` take a while
fn slow_upper(source: &str) -> Result<String, CompileError> {
    if source.starts_with("slow") {
        std::thread::sleep(Duration::from_millis(50));
    }
    if source.contains('!') {
        return Err(CompileError::Syntax {
            message: "bang".to_string(),
            offset: source.find('!').unwrap_or(0),
        });
    }
    Ok(source.to_uppercase())
}

// ────────────────────────────────────────────────────────────────────────────
// Ordering
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_jobs_settle_in_submission_order() {
    LocalSet::new()
        .run_until(async {
            let queue = CompileQueue::with_transformer(slow_upper);
            let settled = Rc::new(RefCell::new(Vec::new()));
            for source in ["slow a", "b", "slow c", "d"] {
                let settled = Rc::clone(&settled);
                queue.submit(source, move |result| settled.borrow_mut().push(result.unwrap()));
            }
            queue.wait_for_compiled().await;
            assert_eq!(*settled.borrow(), vec!["SLOW A", "B", "SLOW C", "D"]);
        })
        .await;
}

#[tokio::test]
async fn test_one_at_a_time() {
    struct Gauge {
        running: AtomicUsize,
        max_seen: AtomicUsize,
    }
    struct Counting(Arc<Gauge>);
    impl Transformer for Counting {
        fn transform(&self, source: &str) -> Result<String, CompileError> {
            let now = self.0.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.0.max_seen.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            self.0.running.fetch_sub(1, Ordering::SeqCst);
            Ok(source.to_string())
        }
    }

    LocalSet::new()
        .run_until(async {
            let counting = Arc::new(Gauge {
                running: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
            });
            let queue = CompileQueue::with_transformer(Counting(Arc::clone(&counting)));
            let jobs: Vec<_> = (0..8).map(|i| queue.compile(i.to_string())).collect();
            for (i, job) in jobs.into_iter().enumerate() {
                assert_eq!(job.await.unwrap(), i.to_string());
            }
            assert_eq!(counting.max_seen.load(Ordering::SeqCst), 1);
        })
        .await;
}

// ────────────────────────────────────────────────────────────────────────────
// Draining
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_wait_on_empty_queue_resolves_immediately() {
    LocalSet::new()
        .run_until(async {
            let queue = CompileQueue::new(&JsxOptions::default());
            tokio::time::timeout(Duration::from_secs(1), queue.wait_for_compiled())
                .await
                .expect("idle queue should not block");
        })
        .await;
}

#[tokio::test]
async fn test_wait_covers_jobs_queued_while_draining() {
    LocalSet::new()
        .run_until(async {
            let queue = CompileQueue::with_transformer(slow_upper);
            let settled = Rc::new(RefCell::new(Vec::new()));

            let follow_up = {
                let (queue, settled) = (queue.clone(), Rc::clone(&settled));
                move |result: Result<String, CompileError>| {
                    settled.borrow_mut().push(result.unwrap());
                    let settled = Rc::clone(&settled);
                    queue.submit("slow second", move |result| settled.borrow_mut().push(result.unwrap()));
                }
            };
            queue.submit("first", follow_up);

            queue.wait_for_compiled().await;
            assert_eq!(*settled.borrow(), vec!["FIRST", "SLOW SECOND"]);
            assert!(queue.is_idle());
            assert_eq!(queue.pending(), 0);
        })
        .await;
}

#[tokio::test]
async fn test_brief_idle_releases_waiter_despite_new_submit() {
    LocalSet::new()
        .run_until(async {
            let (release, gate) = std::sync::mpsc::channel::<()>();
            let gate = parking_lot::Mutex::new(gate);
            let queue = CompileQueue::with_transformer(move |source: &str| -> Result<String, CompileError> {
                let _ = gate.lock().recv();
                Ok(source.to_string())
            });

            let first = queue.compile("first");
            let waiter = {
                let queue = queue.clone();
                tokio::task::spawn_local(async move { queue.wait_for_compiled().await })
            };
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            assert!(!waiter.is_finished());

            release.send(()).unwrap();
            assert_eq!(first.await.unwrap(), "first");
            let epoch = queue.idle_epoch();

            // Busy again before the waiter gets to look.
            let second = queue.compile("second");
            assert!(!queue.is_idle());
            tokio::time::timeout(Duration::from_secs(5), waiter)
                .await
                .expect("waiter should see the idle moment")
                .unwrap();
            assert!(!queue.is_idle());

            release.send(()).unwrap();
            assert_eq!(second.await.unwrap(), "second");
            assert_eq!(queue.idle_epoch(), epoch + 1);
        })
        .await;
}

// ────────────────────────────────────────────────────────────────────────────
// Results
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failure_does_not_stall_later_jobs() {
    LocalSet::new()
        .run_until(async {
            let queue = CompileQueue::with_transformer(slow_upper);
            let bad = queue.compile("no!");
            let good = queue.compile("yes");
            assert_eq!(
                bad.await,
                Err(CompileError::Syntax {
                    message: "bang".to_string(),
                    offset: 2
                })
            );
            assert_eq!(good.await.unwrap(), "YES");
        })
        .await;
}

#[tokio::test]
async fn test_compiling_same_text_twice_is_identical() {
    LocalSet::new()
        .run_until(async {
            let queue = CompileQueue::new(&JsxOptions::default());
            let source = "items.map((item) => <li class=\"row\">{item.name}</li>)";
            let first = queue.compile(source).await.unwrap();
            let second = queue.compile(source).await.unwrap();
            assert_eq!(first, second);
            assert_eq!(first, JsxTransformer::default().transform(source).unwrap());
        })
        .await;
}

#[tokio::test]
async fn test_jsx_syntax_error_reported() {
    LocalSet::new()
        .run_until(async {
            let queue = CompileQueue::new(&JsxOptions::default());
            let result = queue.compile("<a><b></a>").await;
            assert!(matches!(result, Err(CompileError::Syntax { .. })));
        })
        .await;
}
