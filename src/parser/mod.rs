//! Event parser: turns one raw server output line into a [`LogEvent`].
//!
//! Rules are tried in order (chat, join, leave) and the first match wins.
//! The update-notice pattern is evaluated independently through
//! [`EventParser::is_update_notice`], so a chat line quoting the notice is both
//! a chat message and an update trigger.

use regex::Regex;

/// Fallback update notice used when the configured pattern does not compile.
pub const DEFAULT_UPDATE_PATTERN: &str =
    r"(?i)there (?:is|'s) a new (?:version|build|update) of geyser available";

/// User names: extended Latin letters, digits, underscore, hyphen, dot.
const USER_CHARS: &str = r"[0-9A-Za-z_.\-\x{00C0}-\x{024F}]+";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    ChatMessage { user: String, text: String },
    PlayerJoined { user: String },
    PlayerLeft { user: String },
    UpdateAvailable,
    Other,
}

#[derive(Debug, Clone, Copy)]
enum RuleKind {
    Chat,
    Join,
    Leave,
}

#[derive(Debug, Clone)]
pub struct EventParser {
    rules: Vec<(Regex, RuleKind)>,
    update_notice: Regex,
    player_list: Regex,
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new(None)
    }
}

impl EventParser {
    /// Build the parser. `update_pattern` overrides the update-notice regex;
    /// an invalid pattern is logged and replaced by [`DEFAULT_UPDATE_PATTERN`].
    pub fn new(update_pattern: Option<&str>) -> Self {
        let rules = vec![
            (compile(r"\[.*?\]: <([^>]+)> (.*)"), RuleKind::Chat),
            (
                compile(&format!(r"\[.*?\]: ({}) joined the game", USER_CHARS)),
                RuleKind::Join,
            ),
            (
                compile(&format!(r"\[.*?\]: ({}) left the game", USER_CHARS)),
                RuleKind::Leave,
            ),
        ];

        let update_notice = match update_pattern.map(Regex::new) {
            Some(Ok(re)) => re,
            Some(Err(e)) => {
                tracing::warn!("Invalid update notice pattern: {}, falling back to default", e);
                compile(DEFAULT_UPDATE_PATTERN)
            }
            None => compile(DEFAULT_UPDATE_PATTERN),
        };

        Self {
            rules,
            update_notice,
            player_list: compile(
                r"There are \d+ of a max (?:of )?\d+(?: players online)?:(.*)",
            ),
        }
    }

    /// Classify one raw line. Never fails; unmatched input is [`LogEvent::Other`].
    pub fn parse_line(&self, raw: &str) -> LogEvent {
        for (re, kind) in &self.rules {
            let Some(caps) = re.captures(raw) else {
                continue;
            };
            let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();
            return match kind {
                RuleKind::Chat => LogEvent::ChatMessage {
                    user: group(1),
                    text: group(2),
                },
                RuleKind::Join => LogEvent::PlayerJoined { user: group(1) },
                RuleKind::Leave => LogEvent::PlayerLeft { user: group(1) },
            };
        }

        if self.is_update_notice(raw) {
            LogEvent::UpdateAvailable
        } else {
            LogEvent::Other
        }
    }

    pub fn is_update_notice(&self, raw: &str) -> bool {
        self.update_notice.is_match(raw)
    }

    /// Players named in a `list` command reply, or `None` if `raw` is not one.
    pub fn parse_player_list(&self, raw: &str) -> Option<Vec<String>> {
        let caps = self.player_list.captures(raw)?;
        let names = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        Some(
            names
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect(),
        )
    }
}

// Only called with the literal patterns above.
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("built-in pattern {:?} is invalid: {}", pattern, e))
}
