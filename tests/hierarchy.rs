//! Parent/child completion ordering and successor scheduling.

use framejob::JobSystem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn test_parent_with_three_children_then_successor() {
    let jobs = JobSystem::new(4, 1);
    let items = Arc::new(Mutex::new(Vec::new()));
    let successor_runs = Arc::new(AtomicUsize::new(0));
    let observed_len = Arc::new(AtomicUsize::new(usize::MAX));

    let sys = jobs.clone();
    let list = Arc::clone(&items);
    let runs = Arc::clone(&successor_runs);
    let len = Arc::clone(&observed_len);
    jobs.submit(move || {
        for i in 0..3 {
            let list = Arc::clone(&list);
            sys.submit_child(move || {
                list.lock().unwrap().push(i);
            });
        }
        let list = Arc::clone(&list);
        let runs = Arc::clone(&runs);
        let len = Arc::clone(&len);
        sys.on_finished(move || {
            // All children have completed before the successor is enqueued.
            len.store(list.lock().unwrap().len(), Ordering::SeqCst);
            runs.fetch_add(1, Ordering::SeqCst);
        });
    });

    jobs.wait();
    assert_eq!(observed_len.load(Ordering::SeqCst), 3);
    assert_eq!(successor_runs.load(Ordering::SeqCst), 1);
    assert_eq!(items.lock().unwrap().len(), 3);
    jobs.shutdown().expect("shutdown failed");
}

#[test]
fn test_grandchildren_complete_before_root_successor() {
    let jobs = JobSystem::new(4, 1);
    let leaves = Arc::new(AtomicUsize::new(0));
    let observed_at_finish = Arc::new(AtomicUsize::new(0));

    let sys = jobs.clone();
    let count = Arc::clone(&leaves);
    let observed = Arc::clone(&observed_at_finish);
    jobs.submit(move || {
        for _ in 0..4 {
            let sys2 = sys.clone();
            let count = Arc::clone(&count);
            sys.submit_child(move || {
                for _ in 0..4 {
                    let count = Arc::clone(&count);
                    sys2.submit_child(move || {
                        count.fetch_add(1, Ordering::SeqCst);
                    });
                }
            });
        }
        let count = Arc::clone(&count);
        let observed = Arc::clone(&observed);
        sys.on_finished(move || {
            observed.store(count.load(Ordering::SeqCst), Ordering::SeqCst);
        });
    });

    jobs.wait();
    assert_eq!(leaves.load(Ordering::SeqCst), 16);
    assert_eq!(observed_at_finish.load(Ordering::SeqCst), 16);
    jobs.shutdown().expect("shutdown failed");
}

#[test]
fn test_successor_runs_exactly_once_per_completion() {
    let jobs = JobSystem::new(4, 1);
    let runs = Arc::new(AtomicUsize::new(0));

    for _ in 0..50 {
        let sys = jobs.clone();
        let runs = Arc::clone(&runs);
        jobs.submit(move || {
            let runs = Arc::clone(&runs);
            sys.on_finished(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        });
    }

    jobs.wait();
    assert_eq!(runs.load(Ordering::SeqCst), 50);
    jobs.shutdown().expect("shutdown failed");
}
