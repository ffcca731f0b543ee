//! The subject sequence table: resolves a text position into the subject
//! that owns it, or rejects positions that cross a subject boundary.

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Subject {
    pub name: String,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AnnotationTable {
    subjects: Vec<Subject>,
}

impl AnnotationTable {
    pub fn new(subjects: Vec<Subject>) -> AnnotationTable {
        debug_assert!(
            subjects
                .windows(2)
                .all(|w| w[0].offset + w[0].length <= w[1].offset),
            "subjects must be ordered by offset and non-overlapping",
        );
        AnnotationTable { subjects }
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    pub fn total_length(&self) -> usize {
        self.subjects
            .last()
            .map(|s| s.offset + s.length)
            .unwrap_or(0)
    }

    /// Resolve `text_pos` to `(subject_index, local_offset)`. `None` if
    /// `text_pos` falls in the gap between two subjects (which, by
    /// construction, is never inside a valid subject span).
    pub fn resolve(&self, text_pos: usize) -> Option<(usize, usize)> {
        let idx = self
            .subjects
            .binary_search_by(|s| {
                if text_pos < s.offset {
                    std::cmp::Ordering::Greater
                } else if text_pos >= s.offset + s.length {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .ok()?;
        Some((idx, text_pos - self.subjects[idx].offset))
    }

    /// True when `[start, end)` lies entirely within a single subject.
    pub fn range_within_one_subject(&self, start: usize, end: usize) -> bool {
        if end <= start {
            return false;
        }
        match self.resolve(start) {
            Some((idx, _)) => {
                let s = &self.subjects[idx];
                end <= s.offset + s.length
            }
            None => false,
        }
    }
}
