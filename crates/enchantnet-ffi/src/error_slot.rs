//! Per-thread last-error slot.
//!
//! A failing export stores its message here; `get_error_msg` takes it.
//! Successful calls never touch the slot.

use std::cell::RefCell;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Record the failure of the current call on this thread.
pub fn set_last_error(message: impl Into<String>) {
    let message = message.into();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Take the pending message, leaving the slot empty.
pub fn take_last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow_mut().take())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_clears_slot() {
        set_last_error("boom");
        assert_eq!(take_last_error().as_deref(), Some("boom"));
        assert_eq!(take_last_error(), None);
    }

    #[test]
    fn test_latest_error_wins() {
        set_last_error("first");
        set_last_error("second");
        assert_eq!(take_last_error().as_deref(), Some("second"));
    }

    #[test]
    fn test_slot_is_per_thread() {
        set_last_error("main");
        let other = std::thread::spawn(take_last_error).join().unwrap();
        assert_eq!(other, None);
        assert_eq!(take_last_error().as_deref(), Some("main"));
    }
}
