//! Slot reuse across recording cycles.

use framejob::JobSystem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[test]
fn test_reset_reuses_slots_from_the_front() {
    let jobs = JobSystem::new(2, 2);
    let first_slot = Arc::new(AtomicU32::new(u32::MAX));
    let second_slot = Arc::new(AtomicU32::new(u32::MAX));

    let sys = jobs.clone();
    let observed = Arc::clone(&first_slot);
    jobs.submit_to(1, move || {
        observed.store(sys.current_job().unwrap().slot(), Ordering::SeqCst);
    });
    jobs.wait();
    assert_eq!(first_slot.load(Ordering::SeqCst), 0);

    jobs.reset_pool(1);

    let sys = jobs.clone();
    let observed = Arc::clone(&second_slot);
    jobs.submit_to(1, move || {
        observed.store(sys.current_job().unwrap().slot(), Ordering::SeqCst);
    });
    jobs.wait();
    // The completed slot was recycled rather than the cursor marching on.
    assert_eq!(second_slot.load(Ordering::SeqCst), 0);
    jobs.shutdown().expect("shutdown failed");
}

#[test]
fn test_recording_grows_again_after_reset() {
    let jobs = JobSystem::new(4, 2);
    let total = Arc::new(AtomicU32::new(0));

    for _frame in 0..3 {
        let sys = jobs.clone();
        let total2 = Arc::clone(&total);
        jobs.submit_to(1, move || {
            for _ in 0..10 {
                let total3 = Arc::clone(&total2);
                sys.submit_child(move || {
                    total3.fetch_add(1, Ordering::SeqCst);
                });
            }
        });
        jobs.wait();
        jobs.reset_pool(1);
    }

    assert_eq!(total.load(Ordering::SeqCst), 30);
    jobs.shutdown().expect("shutdown failed");
}
