//! Phrase tables that map human wording onto backend identifiers.
//!
//! Both tables preserve insertion order. Entity matching depends on that order
//! for tie-breaks; action matching sorts by phrase length instead.

/// Insertion-ordered phrase -> value table.
///
/// Phrases are stored lowercased. Upserting an existing phrase replaces the
/// value in place and keeps the phrase's original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTable {
    entries: Vec<(String, String)>,
}

impl MappingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a phrase. A blank phrase would match every input,
    /// so it is ignored and `false` is returned.
    pub fn upsert(&mut self, phrase: &str, value: &str) -> bool {
        let phrase = normalize(phrase);
        if phrase.is_empty() {
            return false;
        }
        match self.entries.iter_mut().find(|(p, _)| *p == phrase) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((phrase, value.to_string())),
        }
        true
    }

    /// Remove a phrase. Returns whether it was present.
    pub fn remove(&mut self, phrase: &str) -> bool {
        let phrase = normalize(phrase);
        let before = self.entries.len();
        self.entries.retain(|(p, _)| *p != phrase);
        self.entries.len() != before
    }

    #[must_use]
    pub fn get(&self, phrase: &str) -> Option<&str> {
        let phrase = normalize(phrase);
        self.entries
            .iter()
            .find(|(p, _)| *p == phrase)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, v)| (p.as_str(), v.as_str()))
    }

    /// First phrase, in insertion order, that occurs in `input`.
    #[must_use]
    pub fn first_match(&self, input: &str) -> Option<(&str, &str)> {
        self.iter().find(|(phrase, _)| input.contains(phrase))
    }

    /// Longest phrase that occurs in `input`. Equal lengths keep insertion order.
    ///
    /// Longest-first keeps "unlock" from being shadowed by "lock".
    #[must_use]
    pub fn longest_match(&self, input: &str) -> Option<(&str, &str)> {
        let mut by_length: Vec<(&str, &str)> = self.iter().collect();
        // Stable sort: ties keep table order.
        by_length.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        by_length.into_iter().find(|(phrase, _)| input.contains(phrase))
    }
}

impl<P: AsRef<str>, V: AsRef<str>> FromIterator<(P, V)> for MappingTable {
    fn from_iter<I: IntoIterator<Item = (P, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (phrase, value) in iter {
            table.upsert(phrase.as_ref(), value.as_ref());
        }
        table
    }
}

/// Immutable view of both tables, published as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingSnapshot {
    pub actions: MappingTable,
    pub entities: MappingTable,
}

/// Phrases found in an input by the deterministic stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhraseMatch<'a> {
    /// `(phrase, action_key)`
    pub action: Option<(&'a str, &'a str)>,
    /// `(phrase, entity_id)`
    pub target: Option<(&'a str, &'a str)>,
}

impl MappingSnapshot {
    /// Scan `input` (already lowercased) against both tables.
    #[must_use]
    pub fn match_phrases<'a>(&'a self, input: &str) -> PhraseMatch<'a> {
        PhraseMatch {
            action: self.actions.longest_match(input),
            target: self.entities.first_match(input),
        }
    }
}

/// Tables the hub starts with.
#[must_use]
pub fn default_mappings() -> MappingSnapshot {
    let entities = [
        ("all", "all"),
        ("front door", "lock.front_door"),
        ("garage door", "lock.garage_door"),
        ("living room", "light.living_room"),
    ];
    let actions = [
        ("lock", "lock/lock"),
        ("unlock", "lock/unlock"),
        ("open", "lock/open"),
        ("turn on", "light/turn_on"),
        ("toggle", "light/toggle"),
    ];
    MappingSnapshot {
        actions: actions.into_iter().collect(),
        entities: entities.into_iter().collect(),
    }
}

fn normalize(phrase: &str) -> String {
    phrase.trim().to_lowercase()
}
