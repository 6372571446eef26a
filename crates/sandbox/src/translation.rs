//! Process-wide switch for predecoding guest code on a worker thread.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::counters::instance_count;

static BACKGROUND_TRANSLATION: AtomicBool = AtomicBool::new(false);

/// Makes every program loaded from now on get its executable segment
/// predecoded in the background. Only possible while no sandbox exists;
/// returns whether the switch was flipped.
pub fn enable_background_translation() -> bool {
    let alive = instance_count();
    if alive > 0 {
        log::warn!("cannot enable background translation: {alive} sandbox instance(s) exist");
        return false;
    }
    BACKGROUND_TRANSLATION.store(true, Ordering::Release);
    log::debug!("background translation enabled");
    true
}

pub fn background_translation_enabled() -> bool {
    BACKGROUND_TRANSLATION.load(Ordering::Acquire)
}
