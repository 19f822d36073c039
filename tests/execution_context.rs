use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use fsm_runtime::{
    ExecutionError, ExecutionFactory, RuntimeConfig, ShutdownMode, ThreadedExecutionFactory,
};
use parking_lot::Mutex;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn work_from_different_threads_runs_in_submission_order() {
    init_tracing();
    let factory = ThreadedExecutionFactory::default();
    let context = factory.create_executor("Ordering").unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    for item in ["W1", "W2", "W3"] {
        let submitter = context.clone();
        let log = log.clone();
        thread::spawn(move || {
            submitter.execute(move || log.lock().push(item)).unwrap();
        })
        .join()
        .unwrap();
    }

    context.wait_for_queued().await.unwrap();
    assert_eq!(*log.lock(), vec!["W1", "W2", "W3"]);
}

#[tokio::test]
async fn only_one_unit_of_work_runs_at_a_time() {
    let factory = ThreadedExecutionFactory::default();
    let context = factory.create_executor("Exclusive").unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let context = context.clone();
            let running = running.clone();
            let overlaps = overlaps.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    let running = running.clone();
                    let overlaps = overlaps.clone();
                    context
                        .execute(move || {
                            if running.fetch_add(1, Ordering::SeqCst) > 0 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::yield_now();
                            running.fetch_sub(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    context.wait_until_idle().await.unwrap();
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn panicking_work_does_not_stop_the_worker() {
    init_tracing();
    let factory = ThreadedExecutionFactory::default();
    let context = factory.create_executor("Faulty").unwrap();

    context.execute(|| panic!("tick failed")).unwrap();
    let after = context.submit(|| "still alive").unwrap().await.unwrap();

    assert_eq!(after, "still alive");
    assert_eq!(context.fault_count(), 1);
}

#[tokio::test]
async fn release_is_idempotent_and_rejects_late_work() {
    let factory = ThreadedExecutionFactory::default();
    let context = factory.create_executor("Release").unwrap();

    factory.release_executor(&context);
    factory.release_executor(&context);

    assert!(context.is_released());
    assert!(!context.shutdown(ShutdownMode::Graceful));
    assert!(matches!(
        context.execute(|| ()),
        Err(ExecutionError::Released { .. })
    ));

    context.terminated().await;
    assert!(context.is_terminated());
    assert_eq!(factory.live_workers(), 0);
}

#[tokio::test]
async fn graceful_release_drains_queued_work() {
    let factory = ThreadedExecutionFactory::default();
    let context = factory.create_executor("Drain").unwrap();
    let done = Arc::new(AtomicUsize::new(0));

    let completions: Vec<_> = (0..10)
        .map(|_| {
            let done = done.clone();
            context
                .submit(move || {
                    thread::sleep(Duration::from_millis(2));
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        })
        .collect();
    factory.release_executor(&context);

    for completion in completions {
        completion.await.unwrap();
    }
    context.terminated().await;
    assert_eq!(done.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn immediate_shutdown_interrupts_waiting_callers() {
    let factory = ThreadedExecutionFactory::new(
        RuntimeConfig::default().with_release_mode(ShutdownMode::Immediate),
    );
    let context = factory.create_executor("Abort").unwrap();
    let (started_tx, started_rx) = std::sync::mpsc::channel();

    let running = context
        .submit(move || {
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
        })
        .unwrap();
    let queued = context.submit(|| ()).unwrap();
    started_rx.recv().unwrap();

    factory.release_executor(&context);

    running.await.unwrap();
    assert!(matches!(
        queued.await,
        Err(ExecutionError::Interrupted { .. })
    ));
    context.terminated().await;
    assert_eq!(context.pending(), 0);
}

#[tokio::test]
async fn wait_until_idle_covers_work_enqueued_by_work() {
    let factory = ThreadedExecutionFactory::default();
    let context = factory.create_executor("Nested").unwrap();
    let hops = Arc::new(AtomicUsize::new(0));

    fn hop(context: fsm_runtime::ExecutionContext, hops: Arc<AtomicUsize>) {
        thread::sleep(Duration::from_millis(5));
        if hops.fetch_add(1, Ordering::SeqCst) < 4 {
            let next = context.clone();
            context.execute(move || hop(next, hops)).unwrap();
        }
    }

    let first = context.clone();
    let counter = hops.clone();
    context.execute(move || hop(first, counter)).unwrap();

    context.wait_until_idle().await.unwrap();
    assert_eq!(hops.load(Ordering::SeqCst), 5);
    assert_eq!(context.pending(), 0);
}

#[tokio::test]
async fn wait_for_queued_ignores_later_work() {
    let factory = ThreadedExecutionFactory::default();
    let context = factory.create_executor("Snapshot").unwrap();
    let seen = Arc::new(AtomicUsize::new(0));

    let counter = seen.clone();
    context
        .execute(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    context.wait_for_queued().await.unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn factory_recognises_its_own_workers() {
    let factory = Arc::new(ThreadedExecutionFactory::default());
    let other = Arc::new(ThreadedExecutionFactory::default());
    let context = factory.create_executor("Probe").unwrap();

    assert!(!factory.is_running_in_execution_context());

    let (mine, theirs) = {
        let factory = factory.clone();
        let other = other.clone();
        context
            .submit(move || {
                (
                    factory.is_running_in_execution_context(),
                    other.is_running_in_execution_context(),
                )
            })
            .unwrap()
            .await
            .unwrap()
    };

    assert!(mine);
    assert!(!theirs);
}

#[tokio::test]
async fn worker_thread_name_identifies_the_instance() {
    let factory = ThreadedExecutionFactory::default();
    let context = factory.create_executor("Elevator").unwrap();

    let name = context
        .submit(|| thread::current().name().map(str::to_string))
        .unwrap()
        .await
        .unwrap()
        .unwrap();

    assert!(name.starts_with("StateMachine-Elevator-"));
    assert_eq!(name, context.name());
}

#[tokio::test]
async fn dropping_every_handle_stops_the_worker() {
    let factory = ThreadedExecutionFactory::default();
    let context = factory.create_executor("Dropped").unwrap();
    context.wait_for_queued().await.unwrap();
    assert_eq!(factory.live_workers(), 1);

    drop(context);
    for _ in 0..100 {
        if factory.live_workers() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(factory.live_workers(), 0);
}
