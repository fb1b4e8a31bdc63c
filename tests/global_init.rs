use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use search_log_sink::memory_sink::MemorySink;
use search_log_sink::{
    connector_fn, init_logger, init_logger_with, logger, try_logger, LogSink, LoggerConfig,
    LoggerError,
};

// The process-wide slot can be filled only once, so everything touching
// it lives in this one test binary and this one test.
#[test]
fn racing_initializers_build_exactly_one_global_logger() {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemorySink::new();
    let connects = Arc::new(AtomicUsize::new(0));
    let barrier = Barrier::new(8);

    let results: Vec<Result<usize, LoggerError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (dir, sink, connects, barrier) = (&dir, &sink, &connects, &barrier);
                scope.spawn(move || {
                    let config = LoggerConfig {
                        overflow_path: dir.path().join("logs.txt"),
                        echo: false,
                        health_check_interval: Duration::from_secs(3600),
                        ..LoggerConfig::with_backend("memory://")
                    };
                    let sink = sink.clone();
                    let connects = Arc::clone(connects);
                    let connector = connector_fn(move |_| {
                        connects.fetch_add(1, Ordering::SeqCst);
                        Ok(Arc::new(sink.clone()) as Arc<dyn LogSink>)
                    });
                    barrier.wait();
                    init_logger_with(config, connector)
                        .map(|logger| logger as *const _ as usize)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<usize> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(winners.len(), 1, "{results:?}");
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| matches!(r, Err(LoggerError::AlreadyInitialized))));
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    // Later accessors see the same instance and never rebuild it.
    let instance = try_logger().unwrap();
    assert_eq!(instance as *const _ as usize, winners[0]);
    let seen: Vec<usize> = std::thread::scope(|scope| {
        let handles: Vec<_> =
            (0..8).map(|_| scope.spawn(|| logger() as *const _ as usize)).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(seen.iter().all(|&p| p == winners[0]));
    let late = init_logger(LoggerConfig::default());
    assert!(matches!(late, Err(LoggerError::AlreadyInitialized)));
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    instance.info("from the global logger", Default::default());
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while sink.is_empty() {
        assert!(std::time::Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(5));
    }
}
