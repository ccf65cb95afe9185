//! Unique identifier capability.
//!
//! Message ids, MIME boundaries and attachment content-ids all draw from an
//! [`IdGenerator`], so tests can substitute a deterministic sequence.

/// Returns a fresh, unique string on every call.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn next_id(&self) -> String {
        self()
    }
}

/// Default generator producing random (v4) UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn uuid_generator_yields_distinct_ids() {
        let ids = UuidGenerator;
        let a = ids.next_id();
        let b = ids.next_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn closures_are_generators() {
        let counter = AtomicU32::new(0);
        let ids = move || format!("id-{}", counter.fetch_add(1, Ordering::Relaxed));
        assert_eq!(ids.next_id(), "id-0");
        assert_eq!(ids.next_id(), "id-1");
    }
}
