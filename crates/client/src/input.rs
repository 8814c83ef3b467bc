//! Input sampling.

use skirmish_sim::Intent;

/// Source of the current intent vector, sampled once per tick.
pub trait InputSource {
    fn intent(&self) -> Intent;
}

/// A fixed intent.
impl InputSource for Intent {
    fn intent(&self) -> Intent {
        *self
    }
}

/// Keyboard state mapped onto an intent: W up, A left, S down, D right.
#[derive(Debug, Default, Clone)]
pub struct KeyboardIntent {
    intent: Intent,
}

impl KeyboardIntent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` for keys that map to no intent.
    pub fn key_down(&mut self, key: &str) -> bool {
        self.set(key, true)
    }

    pub fn key_up(&mut self, key: &str) -> bool {
        self.set(key, false)
    }

    /// Release everything, e.g. when focus is lost.
    pub fn clear(&mut self) {
        self.intent = Intent::default();
    }

    fn set(&mut self, key: &str, pressed: bool) -> bool {
        let slot = match key.to_ascii_lowercase().as_str() {
            "w" => &mut self.intent.up,
            "a" => &mut self.intent.left,
            "s" => &mut self.intent.down,
            "d" => &mut self.intent.right,
            _ => return false,
        };
        *slot = pressed;
        true
    }
}

impl InputSource for KeyboardIntent {
    fn intent(&self) -> Intent {
        self.intent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wasd_mapping() {
        let mut keys = KeyboardIntent::new();
        assert!(keys.key_down("d"));
        assert!(keys.key_down("W"));
        assert_eq!(
            keys.intent(),
            Intent {
                right: true,
                up: true,
                ..Default::default()
            }
        );

        assert!(keys.key_up("D"));
        assert_eq!(keys.intent(), Intent::up());
    }

    #[test]
    fn test_unmapped_key_ignored() {
        let mut keys = KeyboardIntent::new();
        assert!(!keys.key_down("ArrowLeft"));
        assert_eq!(keys.intent(), Intent::default());
    }

    #[test]
    fn test_clear_releases_all() {
        let mut keys = KeyboardIntent::new();
        keys.key_down("a");
        keys.key_down("s");
        keys.clear();
        assert_eq!(keys.intent(), Intent::default());
    }
}
