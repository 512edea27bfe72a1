//! Text accumulator: folds delta and full-content updates into one buffer.

/// What an update did to the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextChange {
    Unchanged,
    /// New text appended at the end of the buffer.
    Appended(String),
    /// The buffer was rewritten; carries the whole new buffer.
    Replaced(String),
}

#[derive(Debug)]
struct Segment {
    part_id: Option<String>,
    text: String,
}

/// Per-run text buffer, kept as one segment per text part.
#[derive(Debug, Default)]
pub struct TextAccumulator {
    segments: Vec<Segment>,
}

impl TextAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update. When both `delta` and `full_content` are present the
    /// full content is authoritative, unless it is just the delta mirrored
    /// back, which the engine does for streamed chunks.
    pub fn apply(
        &mut self,
        delta: Option<&str>,
        full_content: Option<&str>,
        part_id: Option<&str>,
    ) -> TextChange {
        let delta = delta.filter(|d| !d.is_empty());
        let full = full_content.filter(|f| !f.is_empty() && *f != "[REDACTED]");

        match (delta, full) {
            (Some(d), Some(f)) if d == f => self.append(part_id, d),
            (_, Some(f)) => self.replace(part_id, f),
            (Some(d), None) => self.append(part_id, d),
            (None, None) => TextChange::Unchanged,
        }
    }

    fn append(&mut self, part_id: Option<&str>, delta: &str) -> TextChange {
        let index = self.segment_index(part_id);
        let is_last = index + 1 == self.segments.len();
        self.segments[index].text.push_str(delta);
        if is_last {
            TextChange::Appended(delta.to_string())
        } else {
            // An earlier part grew; everything after it shifts.
            TextChange::Replaced(self.text())
        }
    }

    fn replace(&mut self, part_id: Option<&str>, full: &str) -> TextChange {
        let index = self.segment_index(part_id);
        let is_last = index + 1 == self.segments.len();
        let segment = &mut self.segments[index];
        if segment.text == full {
            return TextChange::Unchanged;
        }
        if is_last {
            if let Some(suffix) = full.strip_prefix(segment.text.as_str()) {
                let suffix = suffix.to_string();
                segment.text.push_str(&suffix);
                return TextChange::Appended(suffix);
            }
        }
        segment.text = full.to_string();
        TextChange::Replaced(self.text())
    }

    /// Segment for `part_id`, creating it on first sight. Id-less updates go
    /// to the most recent segment.
    fn segment_index(&mut self, part_id: Option<&str>) -> usize {
        match part_id {
            Some(id) => {
                if let Some(i) = self
                    .segments
                    .iter()
                    .position(|s| s.part_id.as_deref() == Some(id))
                {
                    return i;
                }
                // Text streamed before the engine assigned an id belongs to
                // this part.
                if let Some(last) = self.segments.last_mut() {
                    if last.part_id.is_none() {
                        last.part_id = Some(id.to_string());
                        return self.segments.len() - 1;
                    }
                }
                self.segments.push(Segment {
                    part_id: Some(id.to_string()),
                    text: String::new(),
                });
            }
            None => {
                if !self.segments.is_empty() {
                    return self.segments.len() - 1;
                }
                self.segments.push(Segment {
                    part_id: None,
                    text: String::new(),
                });
            }
        }
        self.segments.len() - 1
    }

    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.text.is_empty())
    }
}
