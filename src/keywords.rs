/// Set of word prefixes that trigger the sticker reaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keywords {
    prefixes: Vec<String>,
}

impl Keywords {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes = prefixes
            .into_iter()
            .flat_map(|p| {
                p.as_ref()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        Self { prefixes }
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.prefixes
    }

    /// True iff some whitespace-delimited word of `message` starts with one of
    /// the prefixes. Comparison is case-sensitive; callers normalise first.
    pub fn matches(&self, message: &str) -> bool {
        message.split_whitespace().any(|word| {
            self.prefixes
                .iter()
                .any(|prefix| word.starts_with(prefix.as_str()))
        })
    }
}
