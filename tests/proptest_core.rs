//! Property-based tests for the task lock, the event parser, the crash
//! classifier, the chat log and the scheduler.

use chrono::{Duration as ChronoDuration, Local, TimeZone, Weekday};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use webcraft_core::coordinator::TaskLock;
use webcraft_core::crash;
use webcraft_core::parser::{EventParser, LogEvent};
use webcraft_core::scheduler::{BackupWindow, Scheduler};
use webcraft_core::supervisor::console::ChatLog;

// ============================================================================
// Strategies
// ============================================================================

#[derive(Debug, Clone)]
enum LockOp {
    Acquire(&'static str),
    Release,
}

fn arb_lock_op() -> impl Strategy<Value = LockOp> {
    prop_oneof![
        3 => prop::sample::select(vec!["backup", "restore", "restart", "stop", "kill", "auto-update"])
            .prop_map(LockOp::Acquire),
        1 => Just(LockOp::Release),
    ]
}

fn arb_user() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_]{3,16}"
}

/// Chat text that cannot spell any crash marker.
fn arb_harmless_text() -> impl Strategy<Value = String> {
    "[abc ]{1,30}"
}

// ============================================================================
// Task lock
// ============================================================================

proptest! {
    #[test]
    fn lock_matches_single_slot_model(ops in prop::collection::vec(arb_lock_op(), 1..60)) {
        let lock = TaskLock::new();
        let mut model: Option<&'static str> = None;

        for op in ops {
            match op {
                LockOp::Acquire(name) => {
                    let got = lock.acquire(name);
                    prop_assert_eq!(got, model.is_none());
                    if got {
                        model = Some(name);
                    }
                }
                LockOp::Release => {
                    lock.release();
                    model = None;
                }
            }
            prop_assert_eq!(lock.current().map(|t| t.name), model.map(String::from));
        }
    }
}

#[test]
fn concurrent_acquire_admits_one_holder() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;

    let lock = Arc::new(TaskLock::new());
    let holders = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let (lock, holders, max_seen, barrier) =
                (lock.clone(), holders.clone(), max_seen.clone(), barrier.clone());
            std::thread::spawn(move || {
                barrier.wait();
                let name = format!("task-{}", i);
                for _ in 0..ROUNDS {
                    if let Ok(guard) = lock.guard(&name) {
                        let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        assert_eq!(guard.state().name, name);
                        std::thread::yield_now();
                        holders.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert!(!lock.is_held());
}

// ============================================================================
// Parser
// ============================================================================

proptest! {
    #[test]
    fn parse_line_is_pure(line in ".{0,120}") {
        let parser = EventParser::default();
        prop_assert_eq!(parser.parse_line(&line), parser.parse_line(&line));
    }

    #[test]
    fn chat_lines_extract_user_and_text(user in arb_user(), text in "[ -~]{1,60}") {
        let parser = EventParser::default();
        let line = format!("[12:00:00] [Server thread/INFO]: <{}> {}", user, text);
        prop_assert_eq!(parser.parse_line(&line), LogEvent::ChatMessage { user, text });
    }

    #[test]
    fn join_and_leave_lines(user in arb_user()) {
        let parser = EventParser::default();
        let joined = format!("[12:00:00] [Server thread/INFO]: {} joined the game", user);
        let left = format!("[12:00:00] [Server thread/INFO]: {} left the game", user);
        prop_assert_eq!(parser.parse_line(&joined), LogEvent::PlayerJoined { user: user.clone() });
        prop_assert_eq!(parser.parse_line(&left), LogEvent::PlayerLeft { user });
    }
}

// ============================================================================
// Crash classifier
// ============================================================================

proptest! {
    #[test]
    fn ordinary_chat_is_not_a_crash(
        lines in prop::collection::vec((arb_user(), arb_harmless_text()), 0..100)
    ) {
        let window: Vec<String> = lines
            .iter()
            .map(|(u, t)| format!("[12:00:00] [Server thread/INFO]: <{}> {}", u, t))
            .collect();
        prop_assert!(!crash::classify(&window));
    }

    #[test]
    fn watchdog_in_window_is_a_crash(
        before in prop::collection::vec(arb_harmless_text(), 0..40),
        after in prop::collection::vec(arb_harmless_text(), 0..40)
    ) {
        let mut window = before;
        window.push("[12:00:00] [Server Watchdog/ERROR]: Watchdog detected a stall".to_string());
        window.extend(after);
        prop_assert!(crash::classify(&window));
    }
}

// ============================================================================
// Chat log
// ============================================================================

proptest! {
    #[test]
    fn chat_log_keeps_newest_in_order(capacity in 1usize..50, count in 0usize..200) {
        let mut chat = ChatLog::with_capacity(capacity);
        for i in 0..count {
            chat.push(format!("<Steve> {}", i));
        }
        let snapshot = chat.snapshot(usize::MAX);
        prop_assert_eq!(snapshot.len(), count.min(capacity));
        let expected: Vec<String> = (count.saturating_sub(capacity)..count)
            .map(|i| format!("<Steve> {}", i))
            .collect();
        prop_assert_eq!(snapshot, expected);
    }
}

// ============================================================================
// Scheduler
// ============================================================================

proptest! {
    #[test]
    fn repeated_polls_in_window_fire_once(
        window_minutes in 1i64..60,
        offsets in prop::collection::vec(0i64..3600, 1..10)
    ) {
        let window = BackupWindow {
            weekday: Weekday::Sun,
            hour: 4,
            minute: 0,
            length: ChronoDuration::minutes(window_minutes),
        };
        // 2026-10-18 is a Sunday
        let start = Local.with_ymd_and_hms(2026, 10, 18, 4, 0, 0).single().unwrap();
        let mut scheduler = Scheduler::new(window);

        let mut polls: Vec<i64> = offsets
            .into_iter()
            .map(|s| s % (window_minutes * 60))
            .collect();
        polls.sort_unstable();

        let mut fired = 0;
        for secs in polls {
            if scheduler.tick(start + ChronoDuration::seconds(secs), || true) {
                fired += 1;
            }
        }
        prop_assert_eq!(fired, 1);
    }
}
