//! Chunking of cleaned content into sections for extraction.

/// How text is split into the sections handed to an extraction strategy.
#[derive(Debug, Clone)]
pub enum ChunkingStrategy {
    /// Split on regex boundaries; patterns apply in sequence.
    Regex { patterns: Vec<String> },
    /// Fixed word windows with overlap; `overlap` must be < `window`.
    SlidingWindow { window: usize, overlap: usize },
}

impl Default for ChunkingStrategy {
    fn default() -> Self {
        ChunkingStrategy::Regex {
            patterns: vec![r"\n\n".to_string()],
        }
    }
}

impl ChunkingStrategy {
    pub fn chunk(&self, text: &str) -> Vec<String> {
        match self {
            ChunkingStrategy::Regex { patterns } => {
                let mut sections = vec![text.to_string()];
                for pattern in patterns {
                    let Ok(re) = regex::Regex::new(pattern) else {
                        tracing::warn!(pattern, "invalid chunking pattern, skipping");
                        continue;
                    };
                    sections = sections
                        .iter()
                        .flat_map(|s| re.split(s).map(|p| p.to_string()))
                        .collect();
                }
                sections.retain(|s| !s.trim().is_empty());
                sections
            }
            ChunkingStrategy::SlidingWindow { window, overlap } => {
                let words: Vec<&str> = text.split_whitespace().collect();
                if words.is_empty() || *window == 0 {
                    return Vec::new();
                }
                let step = window.saturating_sub(*overlap).max(1);
                let mut out = Vec::new();
                let mut start = 0;
                while start < words.len() {
                    let end = (start + window).min(words.len());
                    out.push(words[start..end].join(" "));
                    if end == words.len() {
                        break;
                    }
                    start += step;
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_splits_on_blank_lines() {
        let chunks = ChunkingStrategy::default().chunk("para one\n\npara two\n\n\npara three");
        assert_eq!(chunks, vec!["para one", "para two", "para three"]);
    }

    #[test]
    fn regex_drops_empty_sections() {
        let chunks = ChunkingStrategy::default().chunk("\n\n\n\n");
        assert!(chunks.is_empty());
    }

    #[test]
    fn sliding_window_overlaps() {
        let strategy = ChunkingStrategy::SlidingWindow {
            window: 3,
            overlap: 1,
        };
        let chunks = strategy.chunk("a b c d e");
        assert_eq!(chunks, vec!["a b c", "c d e"]);
    }

    #[test]
    fn sliding_window_short_input_is_one_chunk() {
        let strategy = ChunkingStrategy::SlidingWindow {
            window: 10,
            overlap: 2,
        };
        assert_eq!(strategy.chunk("only four words here"), vec!["only four words here"]);
    }
}
