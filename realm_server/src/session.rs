//! Per-connection player state that the simulation does not need.

use std::collections::BTreeSet;

use realm_shared::entity::Instance;

#[derive(Debug, Clone)]
pub struct Session {
    pub player: Instance,
    pub username: String,
    /// Suspicious intents since the last housekeeping pass.
    pub cheat_score: u32,
    /// Low-mana notice already shown since the last paid attack.
    pub low_mana_warned: bool,
    /// Lights whose overlay the client already has.
    pub lights_loaded: BTreeSet<u32>,
    /// Position in talker dialogue, reset by doors.
    pub talk_index: usize,
    /// Pet spawned for this player, if any.
    pub pet: Option<Instance>,
    /// Dropped by the server; waits for removal at the end of the tick.
    pub terminated: bool,
}

impl Session {
    pub fn new(player: Instance, username: &str) -> Self {
        Self {
            player,
            username: username.to_string(),
            cheat_score: 0,
            low_mana_warned: false,
            lights_loaded: BTreeSet::new(),
            talk_index: 0,
            pet: None,
            terminated: false,
        }
    }

    /// Adds to the cheat score and returns the new value.
    pub fn flag(&mut self, amount: u32) -> u32 {
        self.cheat_score = self.cheat_score.saturating_add(amount);
        self.cheat_score
    }

    /// True the first time mana runs short after a paid attack.
    pub fn should_warn_low_mana(&mut self) -> bool {
        !std::mem::replace(&mut self.low_mana_warned, true)
    }

    /// Records a light as sent. False if the client already had it.
    pub fn load_light(&mut self, id: u32) -> bool {
        self.lights_loaded.insert(id)
    }

    /// Next dialogue line, cycling.
    pub fn next_line<'a>(&mut self, lines: &'a [String]) -> Option<&'a str> {
        if lines.is_empty() {
            return None;
        }
        let line = &lines[self.talk_index % lines.len()];
        self.talk_index = (self.talk_index + 1) % lines.len();
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_mana_warning_is_one_shot() {
        let mut s = Session::new(Instance(1), "alice");
        assert!(s.should_warn_low_mana());
        assert!(!s.should_warn_low_mana());
        s.low_mana_warned = false;
        assert!(s.should_warn_low_mana());
    }

    #[test]
    fn dialogue_cycles() {
        let mut s = Session::new(Instance(1), "alice");
        let lines = vec!["a".to_string(), "b".to_string()];
        assert_eq!(s.next_line(&lines), Some("a"));
        assert_eq!(s.next_line(&lines), Some("b"));
        assert_eq!(s.next_line(&lines), Some("a"));
        assert_eq!(s.next_line(&[]), None);
    }
}
