//! Cached `Date:` header value for HTTP/1.1 responses.
//!
//! Grounded on the teacher's own `rama-http-core::common::date` module: RFC
//! 7231 only requires second-granularity in the `Date` header, so formatting
//! it on every response would be wasted work under load. The value is
//! rendered once per wall-clock second and reused until it goes stale.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use httpdate::HttpDate;

/// `"Sun, 06 Nov 1994 08:49:37 GMT".len()`
const DATE_VALUE_LENGTH: usize = 29;

struct CachedDate {
    text: String,
    next_update: SystemTime,
}

impl CachedDate {
    fn new() -> Self {
        let mut cache = Self {
            text: String::with_capacity(DATE_VALUE_LENGTH),
            next_update: UNIX_EPOCH,
        };
        cache.refresh(SystemTime::now());
        cache
    }

    fn refresh(&mut self, now: SystemTime) {
        let nanos = now.duration_since(UNIX_EPOCH).unwrap_or_default().subsec_nanos();
        self.text.clear();
        let _ = write!(self.text, "{}", HttpDate::from(now));
        self.next_update = now + Duration::from_secs(1) - Duration::from_nanos(u64::from(nanos));
    }

    fn current(&mut self) -> &str {
        let now = SystemTime::now();
        if now >= self.next_update {
            self.refresh(now);
        }
        &self.text
    }
}

thread_local! {
    static CACHED: RefCell<CachedDate> = RefCell::new(CachedDate::new());
}

/// The current `Date:` header value, refreshed at most once per second.
pub fn now_rfc1123() -> String {
    CACHED.with(|cache| cache.borrow_mut().current().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_to_expected_length() {
        let value = now_rfc1123();
        assert_eq!(value.len(), DATE_VALUE_LENGTH);
        assert!(value.ends_with("GMT"));
    }
}
