//! Crash classifier: decides from the trailing raw output whether the last
//! exit was a crash. Heuristic: any single marker match means crash, no match
//! means a normal stop.

/// Number of trailing lines inspected by default.
pub const DEFAULT_WINDOW: usize = 80;

/// Lowercase substrings that mark an abnormal exit.
const CRASH_MARKERS: &[&str] = &[
    // fatal errors
    "fatal error",
    "/fatal]",
    "a fatal error has been detected by the java runtime environment",
    "encountered an unexpected exception",
    "exception in server tick loop",
    "this crash report has been saved to",
    "---- minecraft crash report ----",
    // memory
    "java.lang.outofmemoryerror",
    "out of memory",
    "cannot allocate memory",
    // unhandled exceptions
    "unhandled exception",
    "exception in thread \"main\"",
    "exception in thread \"server thread\"",
    // watchdog / deadlock
    "watchdog",
    "a single server tick took",
    "considering it to be crashed",
    "deadlock",
    "server has stopped responding",
    // native and third-party crash signatures
    "sigsegv",
    "segmentation fault",
    "hs_err_pid",
    "the server has crashed",
    "paper watchdog thread",
    "mixin apply failed",
];

/// Classify the last [`DEFAULT_WINDOW`] lines of `recent`.
pub fn classify<S: AsRef<str>>(recent: &[S]) -> bool {
    classify_window(recent, DEFAULT_WINDOW)
}

/// Classify the last `window` lines of `recent`.
pub fn classify_window<S: AsRef<str>>(recent: &[S], window: usize) -> bool {
    let start = recent.len().saturating_sub(window);
    recent[start..].iter().any(|line| matched_marker(line.as_ref()).is_some())
}

/// The first crash marker contained in `line`, if any.
pub fn matched_marker(line: &str) -> Option<&'static str> {
    let lower = line.to_lowercase();
    CRASH_MARKERS.iter().copied().find(|m| lower.contains(m))
}
