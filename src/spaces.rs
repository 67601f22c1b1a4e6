use std::collections::HashMap;

/// Lookup into the facilities catalogue. Spaces are owned elsewhere; the
/// engine only asks whether an id is known.
pub trait SpaceDirectory: Send + Sync {
    /// Display name for a known space, `None` if the id is unknown.
    fn lookup(&self, space_id: &str) -> Option<String>;
}

/// Fixed catalogue loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticSpaces {
    spaces: HashMap<String, String>,
}

impl StaticSpaces {
    /// Parse `id=Name;id=Name`. Blank entries are skipped; an entry without
    /// `=` uses the id as its name.
    pub fn parse(entries: &str) -> Self {
        let spaces = entries
            .split(';')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((id, name)) => (id.trim().to_string(), name.trim().to_string()),
                None => (entry.to_string(), entry.to_string()),
            })
            .filter(|(id, _)| !id.is_empty())
            .collect();
        Self { spaces }
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}

impl SpaceDirectory for StaticSpaces {
    fn lookup(&self, space_id: &str) -> Option<String> {
        self.spaces.get(space_id).cloned()
    }
}
