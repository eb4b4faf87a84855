//! Player roster: who is online, as seen from join/leave lines and the
//! periodic `list` reply. Web guests are tracked by name prefix only.

use std::collections::HashSet;
use std::net::IpAddr;

#[derive(Debug, Clone, Default)]
pub struct PlayerRoster {
    players: HashSet<String>,
    guest_prefix: String,
}

impl PlayerRoster {
    pub fn new(guest_prefix: &str) -> Self {
        Self {
            players: HashSet::new(),
            guest_prefix: guest_prefix.to_string(),
        }
    }

    /// Returns false if the player was already present.
    pub fn join(&mut self, user: &str) -> bool {
        self.players.insert(user.to_string())
    }

    pub fn leave(&mut self, user: &str) -> bool {
        self.players.remove(user)
    }

    pub fn contains(&self, user: &str) -> bool {
        self.players.contains(user)
    }

    pub fn is_guest(&self, user: &str) -> bool {
        !self.guest_prefix.is_empty() && user.starts_with(&self.guest_prefix)
    }

    /// Replace in-game players with `present`, keeping web guests.
    pub fn reconcile<I, S>(&mut self, present: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let previous = std::mem::take(&mut self.players);
        self.players = previous.into_iter().filter(|p| self.is_guest(p)).collect();
        self.players.extend(present.into_iter().map(Into::into));
    }

    /// Sorted copy, for stable output.
    pub fn snapshot(&self) -> Vec<String> {
        let mut players: Vec<String> = self.players.iter().cloned().collect();
        players.sort();
        players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// Guest name for a web client: prefix + first two characters of the first
/// address segment, zero-padded (`10.0.0.5` → `WebGuest10`, `8.8.8.8` → `WebGuest08`).
pub fn web_guest_name(prefix: &str, ip: IpAddr) -> String {
    let text = ip.to_string();
    let first = text
        .split(|c| c == '.' || c == ':')
        .find(|s| !s.is_empty())
        .unwrap_or("0");
    let digits: String = first.chars().take(2).collect();
    format!("{}{:0>2}", prefix, digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_leave_round_trip() {
        let mut roster = PlayerRoster::new("WebGuest");
        assert!(roster.is_empty());
        assert!(roster.join("Alice"));
        assert!(!roster.join("Alice"));
        assert!(roster.contains("Alice"));
        assert!(roster.leave("Alice"));
        assert!(!roster.contains("Alice"));
        assert!(!roster.leave("Alice"));
    }

    #[test]
    fn test_reconcile_keeps_guests() {
        let mut roster = PlayerRoster::new("WebGuest");
        roster.join("Steve");
        roster.join("Ghost");
        roster.join("WebGuest19");

        roster.reconcile(vec!["Steve", "Alex"]);
        assert_eq!(roster.snapshot(), vec!["Alex", "Steve", "WebGuest19"]);
    }

    #[test]
    fn test_reconcile_empty_list() {
        let mut roster = PlayerRoster::new("WebGuest");
        roster.join("Steve");
        roster.reconcile(Vec::<String>::new());
        assert!(roster.is_empty());
    }

    #[test]
    fn test_web_guest_name() {
        assert_eq!(web_guest_name("WebGuest", "192.168.1.4".parse().unwrap()), "WebGuest19");
        assert_eq!(web_guest_name("WebGuest", "8.8.8.8".parse().unwrap()), "WebGuest08");
        assert_eq!(web_guest_name("WebGuest", "10.0.0.1".parse().unwrap()), "WebGuest10");
        assert_eq!(web_guest_name("WebGuest", "::1".parse().unwrap()), "WebGuest01");
    }
}
