//! Helpers shared by async unit tests.

use std::time::Duration;

/// Poll `cond` until it holds, panicking after about two seconds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {}", what);
}
