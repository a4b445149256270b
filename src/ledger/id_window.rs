/// Where an item id falls relative to the range already crawled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPosition {
    /// Above the crawled range: published since the last run
    Newer,

    /// Inside the crawled range: already processed
    Covered,

    /// Below the crawled range: not reached yet
    Older,
}

/// Range of numeric item ids a target has already processed
///
/// Reverse-chronological sources (news feeds, boards sorted newest first)
/// resume by id instead of by page: everything between `min` and `max` was
/// crawled by an earlier run and can be skipped, everything outside it is new
/// work. Ids that are not numeric are never classified as covered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdWindow {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl IdWindow {
    /// Rebuilds a window from the string ids stored in a checkpoint
    pub fn from_stored(min: Option<&str>, max: Option<&str>) -> Self {
        Self {
            min: min.and_then(|s| s.trim().parse().ok()),
            max: max.and_then(|s| s.trim().parse().ok()),
        }
    }

    /// Classifies an id against the window
    ///
    /// With only one bound known, ids on the far side of it are `Newer` or
    /// `Older` and everything else is treated as new work.
    pub fn classify(&self, id: u64) -> IdPosition {
        match (self.min, self.max) {
            (Some(min), Some(max)) => {
                if id > max {
                    IdPosition::Newer
                } else if id < min {
                    IdPosition::Older
                } else {
                    IdPosition::Covered
                }
            }
            (None, Some(max)) if id <= max => IdPosition::Older,
            (Some(min), None) if id >= min => IdPosition::Newer,
            (None, Some(_)) => IdPosition::Newer,
            (Some(_), None) => IdPosition::Older,
            (None, None) => IdPosition::Newer,
        }
    }

    /// Parses and classifies a textual id; non-numeric ids are `Newer`
    pub fn classify_str(&self, id: &str) -> IdPosition {
        match id.trim().parse::<u64>() {
            Ok(n) => self.classify(n),
            Err(_) => IdPosition::Newer,
        }
    }

    /// Extends the window to include an accepted id
    ///
    /// # Returns
    ///
    /// `true` if the window changed
    pub fn widen(&mut self, id: u64) -> bool {
        let before = *self;
        self.min = Some(self.min.map_or(id, |m| m.min(id)));
        self.max = Some(self.max.map_or(id, |m| m.max(id)));
        *self != before
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// String forms for storing back into a checkpoint
    pub fn to_stored(&self) -> (Option<String>, Option<String>) {
        (
            self.min.map(|n| n.to_string()),
            self.max.map(|n| n.to_string()),
        )
    }
}
