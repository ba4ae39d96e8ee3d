//! Connected player names, in join order.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    players: Vec<String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the name was already present.
    pub fn join(&mut self, player: &str) -> bool {
        if self.contains(player) {
            return false;
        }
        self.players.push(player.to_string());
        true
    }

    /// Removing an absent name is a no-op.
    pub fn leave(&mut self, player: &str) -> bool {
        match self.players.iter().position(|p| p == player) {
            Some(index) => {
                self.players.remove(index);
                true
            }
            None => false,
        }
    }

    /// Replace the whole roster, dropping duplicates but keeping order.
    pub fn sync<I, S>(&mut self, players: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.players.clear();
        for player in players {
            self.join(player.as_ref());
        }
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }

    pub fn contains(&self, player: &str) -> bool {
        self.players.iter().any(|p| p == player)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.players
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent() {
        let mut roster = Roster::new();
        assert!(roster.join("Alice"));
        assert!(!roster.join("Alice"));
        assert_eq!(roster.names(), ["Alice".to_string()]);
    }

    #[test]
    fn join_then_leave_restores_previous_state() {
        let mut roster = Roster::new();
        roster.join("Bob");
        let before = roster.clone();
        roster.join("Alice");
        roster.leave("Alice");
        assert_eq!(roster, before);
    }

    #[test]
    fn leave_absent_is_noop() {
        let mut roster = Roster::new();
        roster.join("Bob");
        assert!(!roster.leave("Carol"));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn sync_deduplicates_in_order() {
        let mut roster = Roster::new();
        roster.join("Zed");
        roster.sync(["Bob", "Alice", "Bob"]);
        assert_eq!(roster.names(), ["Bob".to_string(), "Alice".to_string()]);
        roster.clear();
        assert!(roster.is_empty());
    }
}
