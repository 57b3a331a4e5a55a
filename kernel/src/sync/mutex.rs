pub mod ticket;

pub use self::ticket::{TicketMutex as Mutex, TicketMutexGuard as MutexGuard};

#[cfg(test)]
mod test {
    use super::Mutex;
    use alloc::sync::Arc;
    use std::thread;

    #[test]
    fn guards_are_exclusive() {
        let lock = Mutex::new(0);
        let guard = lock.lock();
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(!lock.is_locked());
        *lock.try_lock().unwrap() += 1;
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn contended_increments() {
        let lock = Arc::new(Mutex::new(0usize));
        let workers: std::vec::Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}
