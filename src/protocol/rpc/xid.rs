use std::sync::atomic::{AtomicU32, Ordering};

/// Transaction id source for one client connection.
///
/// Ids increase by one starting at 1. The counter wraps to 0 instead of
/// ever handing out `u32::MAX`.
#[derive(Debug, Default)]
pub struct XidGenerator {
    last: AtomicU32,
}

impl XidGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the sequence right after `last`.
    pub fn starting_after(last: u32) -> Self {
        Self { last: AtomicU32::new(last) }
    }

    pub fn next_xid(&self) -> u32 {
        let prev = self
            .last
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| Some(advance(last)));
        // fetch_update only fails when the closure returns None.
        advance(prev.unwrap_or_else(|last| last))
    }
}

fn advance(last: u32) -> u32 {
    match last.wrapping_add(1) {
        u32::MAX => 0,
        next => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one() {
        let xids = XidGenerator::new();
        assert_eq!(xids.next_xid(), 1);
        assert_eq!(xids.next_xid(), 2);
    }

    #[test]
    fn skips_reserved_maximum() {
        let xids = XidGenerator::starting_after(u32::MAX - 2);
        assert_eq!(xids.next_xid(), u32::MAX - 1);
        assert_eq!(xids.next_xid(), 0);
        assert_eq!(xids.next_xid(), 1);
    }
}
