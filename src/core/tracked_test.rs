use super::*;
use std::sync::atomic::AtomicBool;
use std::thread;

#[test]
fn test_destroyed_when_owner_releases_last_reference() {
    let disposed = Arc::new(AtomicBool::new(false));
    let flag = disposed.clone();
    let counted = RefCounted::with_disposer(42u32, move |value| {
        assert_eq!(value, 42);
        flag.store(true, Ordering::SeqCst);
    });

    counted.decrement().unwrap();
    assert!(counted.is_destroyed());
    assert!(disposed.load(Ordering::SeqCst));
    assert!(counted.try_get().is_none());
}

#[test]
fn test_decrement_below_zero_fails() {
    let counted = RefCounted::new("chunk");
    counted.decrement().unwrap();
    assert_eq!(counted.decrement(), Err(HandleError::Destroyed));
    assert_eq!(counted.increment(), Err(HandleError::Destroyed));
    assert!(counted.track().is_err());
}

#[test]
fn test_tracked_handle_keeps_value_alive() {
    let counted = RefCounted::new(vec![7u8; 4]);
    let handle = counted.track().unwrap();
    assert_eq!(counted.count(), 2);

    counted.decrement().unwrap();
    assert!(!counted.is_destroyed());
    assert_eq!(handle.try_get().unwrap().as_slice(), &[7, 7, 7, 7]);

    drop(handle);
    assert!(counted.is_destroyed());
}

#[test]
fn test_concurrent_tracking_destroys_once() {
    let disposals = Arc::new(AtomicUsize::new(0));
    let counter = disposals.clone();
    let counted = RefCounted::with_disposer(0u64, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let handles: Vec<_> = (0..8).map(|_| counted.track().unwrap()).collect();
    counted.decrement().unwrap();

    let workers: Vec<_> = handles
        .into_iter()
        .map(|handle| {
            thread::spawn(move || {
                assert!(handle.try_get().is_some());
                handle.release();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(disposals.load(Ordering::SeqCst), 1);
    assert!(counted.is_destroyed());
}
