//! Client-side edit-sync controller.
//!
//! Owns the editor's in-memory buffer, the last-known-synced baseline,
//! and the autosave debounce. On every keystroke the buffer is updated
//! and the debounce timer re-armed; on timer fire or explicit save the
//! controller diffs baseline against buffer, hands the patch set to the
//! caller for transmission, and advances the baseline only once the save
//! is acknowledged.
//!
//! The controller is a plain state machine with no I/O and no hidden
//! timer registry: the debounce is an armed deadline the driver polls
//! (see [`crate::session`] for the async driver).

use std::time::{Duration, Instant};

use crate::patch::{compute_diff, PatchSet};

/// Default quiet period before an automatic save fires.
pub const AUTOSAVE_QUIET_PERIOD: Duration = Duration::from_millis(2000);

/// Sync state of an editing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Buffer matches the baseline; nothing scheduled
    Idle,
    /// Buffer has diverged; a debounced save is scheduled
    Dirty,
    /// A save request is in flight
    Saving,
    /// The last save attempt failed; unsaved changes are retained
    SaveFailed,
}

/// A save request handed to the transport.
///
/// `snapshot` is the exact buffer value the patches were computed from;
/// the baseline advances to it on acknowledgement, regardless of any
/// further typing during the round trip.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub patches: PatchSet,
    pub snapshot: String,
}

/// Explicit debounce timer: arming resets the deadline, the driver
/// polls for expiry.
#[derive(Debug)]
struct DebounceTimer {
    quiet_period: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            deadline: None,
        }
    }

    fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.quiet_period);
    }

    fn disarm(&mut self) {
        self.deadline = None;
    }

    fn expired(&self, now: Instant) -> bool {
        self.deadline.map_or(false, |d| now >= d)
    }
}

/// Per-session edit-sync controller.
pub struct EditSync {
    buffer: String,
    baseline: String,
    state: SyncState,
    in_flight: Option<String>,
    timer: DebounceTimer,
}

impl EditSync {
    /// Start a session from the server-provided content. Baseline and
    /// buffer begin identical.
    pub fn new(initial_content: impl Into<String>) -> Self {
        Self::with_quiet_period(initial_content, AUTOSAVE_QUIET_PERIOD)
    }

    /// Start a session with a custom autosave quiet period.
    pub fn with_quiet_period(initial_content: impl Into<String>, quiet_period: Duration) -> Self {
        let content = initial_content.into();
        Self {
            buffer: content.clone(),
            baseline: content,
            state: SyncState::Idle,
            in_flight: None,
            timer: DebounceTimer::new(quiet_period),
        }
    }

    /// The live, possibly-unsaved text
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// The text believed to match the server's stored copy
    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// True if the buffer holds changes the server has not confirmed
    pub fn has_unsaved_changes(&self) -> bool {
        self.buffer != self.baseline || self.in_flight.is_some()
    }

    /// When the armed debounce deadline expires, if any
    pub fn timer_deadline(&self) -> Option<Instant> {
        self.timer.deadline
    }

    /// Record a buffer mutation (keystroke) and re-arm the debounce.
    ///
    /// Accepted in every state; during an in-flight save the new text
    /// simply schedules a follow-up save.
    pub fn edit(&mut self, new_text: impl Into<String>, now: Instant) {
        self.buffer = new_text.into();
        match self.state {
            SyncState::Saving => {
                // Keystrokes keep landing while the request is out.
                self.timer.arm(now);
            }
            _ => {
                if self.buffer == self.baseline {
                    self.state = SyncState::Idle;
                    self.timer.disarm();
                } else {
                    self.state = SyncState::Dirty;
                    self.timer.arm(now);
                }
            }
        }
    }

    /// Fire the debounce if its deadline has passed.
    ///
    /// Returns the save request to transmit, or None if nothing is due.
    pub fn poll_timer(&mut self, now: Instant) -> Option<SaveRequest> {
        if !self.timer.expired(now) {
            return None;
        }
        self.timer.disarm();
        self.begin_save()
    }

    /// Explicit manual-save trigger (keyboard shortcut). Converges on
    /// the same transition as the autosave timer.
    pub fn save_now(&mut self) -> Option<SaveRequest> {
        self.timer.disarm();
        self.begin_save()
    }

    /// Dirty -> Saving, guarded: at most one save in flight, and a save
    /// of an unchanged buffer is skipped.
    fn begin_save(&mut self) -> Option<SaveRequest> {
        if self.state == SyncState::Saving {
            // Admission control: overlapping patches against the same
            // stale baseline are never issued.
            return None;
        }
        if self.buffer == self.baseline {
            self.state = SyncState::Idle;
            return None;
        }
        let patches = compute_diff(&self.baseline, &self.buffer);
        let snapshot = self.buffer.clone();
        self.in_flight = Some(snapshot.clone());
        self.state = SyncState::Saving;
        tracing::debug!(hunks = patches.len(), "save initiated");
        Some(SaveRequest { patches, snapshot })
    }

    /// Acknowledge the in-flight save. The baseline advances to the
    /// snapshot captured at initiation; if the buffer moved during the
    /// round trip the session goes Dirty and the timer is re-armed.
    pub fn save_succeeded(&mut self, now: Instant) {
        let Some(snapshot) = self.in_flight.take() else {
            return;
        };
        self.baseline = snapshot;
        if self.buffer == self.baseline {
            self.state = SyncState::Idle;
            self.timer.disarm();
        } else {
            self.state = SyncState::Dirty;
            self.timer.arm(now);
        }
    }

    /// Record a failed save. The baseline stays put so the next attempt
    /// re-diffs from a known-good point; the buffer keeps its changes.
    ///
    /// `permanent` marks failures a retry cannot fix (deleted note,
    /// revoked access): the timer stays disarmed and the session waits
    /// for a manual trigger or a re-baseline. Transient failures arm
    /// the timer so the retry flows through the normal debounce path.
    pub fn save_failed(&mut self, permanent: bool, now: Instant) {
        self.in_flight = None;
        self.state = SyncState::SaveFailed;
        if permanent {
            self.timer.disarm();
            tracing::warn!("save rejected permanently; unsaved changes retained");
        } else {
            self.timer.arm(now);
            tracing::warn!("save failed; unsaved changes retained");
        }
    }

    /// Replace the baseline with freshly fetched server truth.
    ///
    /// Recovery hook for repeated patch-apply failures: re-diffing
    /// against actual stored content gives the next save a chance. The
    /// buffer is left alone, so no local text is lost.
    pub fn rebaseline(&mut self, server_content: impl Into<String>, now: Instant) {
        if self.state == SyncState::Saving {
            // An in-flight save still refers to the old baseline.
            return;
        }
        self.baseline = server_content.into();
        if self.buffer == self.baseline {
            self.state = SyncState::Idle;
            self.timer.disarm();
        } else {
            self.state = SyncState::Dirty;
            self.timer.arm(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_millis(2000);

    fn controller(content: &str) -> (EditSync, Instant) {
        (EditSync::with_quiet_period(content, QUIET), Instant::now())
    }

    #[test]
    fn test_starts_idle() {
        let (sync, _) = controller("Hello world");
        assert_eq!(sync.state(), SyncState::Idle);
        assert!(!sync.has_unsaved_changes());
        assert!(sync.timer_deadline().is_none());
    }

    #[test]
    fn test_edit_arms_timer_and_marks_dirty() {
        let (mut sync, t0) = controller("Hello world");
        sync.edit("Hello w", t0);
        assert_eq!(sync.state(), SyncState::Dirty);
        assert_eq!(sync.timer_deadline(), Some(t0 + QUIET));

        // A later keystroke pushes the deadline out.
        let t1 = t0 + Duration::from_millis(500);
        sync.edit("Hello wo", t1);
        assert_eq!(sync.timer_deadline(), Some(t1 + QUIET));
    }

    #[test]
    fn test_timer_does_not_fire_early() {
        let (mut sync, t0) = controller("Hello world");
        sync.edit("Hello brave world", t0);
        assert!(sync.poll_timer(t0 + Duration::from_millis(1999)).is_none());
        assert!(sync.poll_timer(t0 + QUIET).is_some());
    }

    #[test]
    fn test_single_in_flight_save() {
        let (mut sync, t0) = controller("Hello world");
        sync.edit("Hello brave world", t0);

        let req = sync.save_now();
        assert!(req.is_some());
        assert_eq!(sync.state(), SyncState::Saving);

        // Rapid-fire triggers while the save is pending are no-ops.
        assert!(sync.save_now().is_none());
        sync.edit("Hello brave world!", t0 + Duration::from_millis(10));
        assert!(sync.poll_timer(t0 + Duration::from_secs(10)).is_none());
        assert_eq!(sync.state(), SyncState::Saving);
    }

    #[test]
    fn test_baseline_advances_to_snapshot_not_current_buffer() {
        let (mut sync, t0) = controller("Hello world");
        sync.edit("Hello brave world", t0);
        let req = sync.save_now().unwrap();
        assert_eq!(req.snapshot, "Hello brave world");

        // User keeps typing during the round trip.
        sync.edit("Hello brave new world", t0 + Duration::from_millis(100));

        sync.save_succeeded(t0 + Duration::from_millis(200));
        assert_eq!(sync.baseline(), "Hello brave world");
        assert_eq!(sync.buffer(), "Hello brave new world");
        // Newer edits are rescheduled, not lost.
        assert_eq!(sync.state(), SyncState::Dirty);
        assert!(sync.timer_deadline().is_some());
    }

    #[test]
    fn test_success_with_unchanged_buffer_goes_idle() {
        let (mut sync, t0) = controller("Hello world");
        sync.edit("Hello brave world", t0);
        sync.save_now().unwrap();
        sync.save_succeeded(t0 + Duration::from_millis(200));
        assert_eq!(sync.state(), SyncState::Idle);
        assert!(!sync.has_unsaved_changes());
        assert_eq!(sync.baseline(), "Hello brave world");
    }

    #[test]
    fn test_failure_leaves_baseline_untouched() {
        let (mut sync, t0) = controller("Hello world");
        sync.edit("Hello brave world", t0);
        sync.save_now().unwrap();
        sync.save_failed(false, t0 + Duration::from_millis(200));

        assert_eq!(sync.state(), SyncState::SaveFailed);
        assert_eq!(sync.baseline(), "Hello world");
        assert_eq!(sync.buffer(), "Hello brave world");
        assert!(sync.has_unsaved_changes());

        // Retry goes through the normal trigger and re-diffs from the
        // pre-save baseline.
        let req = sync.save_now().unwrap();
        assert_eq!(req.snapshot, "Hello brave world");
        assert_eq!(sync.state(), SyncState::Saving);
    }

    #[test]
    fn test_permanent_failure_disarms_timer() {
        let (mut sync, t0) = controller("Hello world");
        sync.edit("Hello brave world", t0);
        sync.save_now().unwrap();
        sync.save_failed(true, t0 + Duration::from_millis(100));

        assert_eq!(sync.state(), SyncState::SaveFailed);
        assert_eq!(sync.buffer(), "Hello brave world");
        // No automatic retry: the timer stays disarmed however long the
        // session sits there.
        assert!(sync.timer_deadline().is_none());
        assert!(sync.poll_timer(t0 + Duration::from_secs(600)).is_none());

        // A manual trigger still retries.
        let req = sync.save_now().unwrap();
        assert_eq!(req.snapshot, "Hello brave world");
        assert_eq!(sync.state(), SyncState::Saving);
    }

    #[test]
    fn test_save_skipped_when_buffer_matches_baseline() {
        let (mut sync, t0) = controller("Hello world");
        assert!(sync.save_now().is_none());

        // Typing back to the original also counts as clean.
        sync.edit("Hello", t0);
        sync.edit("Hello world", t0 + Duration::from_millis(50));
        assert_eq!(sync.state(), SyncState::Idle);
        assert!(sync.save_now().is_none());
    }

    #[test]
    fn test_debounce_coalesces_burst() {
        let (mut sync, t0) = controller("abc");
        for (i, text) in ["abcd", "abcde", "abcdef"].iter().enumerate() {
            sync.edit(*text, t0 + Duration::from_millis(100 * i as u64));
        }
        // Quiet period counts from the last keystroke.
        let last = t0 + Duration::from_millis(200);
        assert!(sync.poll_timer(last + Duration::from_millis(1999)).is_none());
        let req = sync.poll_timer(last + QUIET).unwrap();
        assert_eq!(req.snapshot, "abcdef");
    }

    #[test]
    fn test_rebaseline_after_failure() {
        let (mut sync, t0) = controller("Hello world");
        sync.edit("Hello brave world", t0);
        sync.save_now().unwrap();
        sync.save_failed(false, t0 + Duration::from_millis(100));

        // Server truth drifted; re-baseline so the next diff applies.
        sync.rebaseline("Hello world!!", t0 + Duration::from_millis(200));
        assert_eq!(sync.baseline(), "Hello world!!");
        assert_eq!(sync.buffer(), "Hello brave world");
        assert_eq!(sync.state(), SyncState::Dirty);

        let req = sync.save_now().unwrap();
        assert_eq!(req.snapshot, "Hello brave world");
    }
}
