//! Writing-script detection for content languages.

/// Script a content language is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Hebrew,
    Latin,
}

impl Script {
    /// Script for a language code. Unknown codes are treated as Latin.
    pub fn for_language(language: &str) -> Self {
        match language {
            "he" | "iw" | "yi" => Script::Hebrew,
            _ => Script::Latin,
        }
    }

    pub fn contains(&self, c: char) -> bool {
        match self {
            Script::Hebrew => ('\u{0590}'..='\u{05FF}').contains(&c),
            Script::Latin => c.is_ascii_alphabetic() || ('\u{00C0}'..='\u{024F}').contains(&c),
        }
    }

    /// Share of all characters (spaces and punctuation included) that
    /// belong to this script. Empty text has ratio 0.
    pub fn ratio(&self, text: &str) -> f64 {
        let total = text.chars().count();
        if total == 0 {
            return 0.0;
        }
        let matching = text.chars().filter(|c| self.contains(*c)).count();
        matching as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_mapping() {
        assert_eq!(Script::for_language("he"), Script::Hebrew);
        assert_eq!(Script::for_language("en"), Script::Latin);
    }

    #[test]
    fn hebrew_ratio() {
        assert_eq!(Script::Hebrew.ratio(""), 0.0);
        assert_eq!(Script::Hebrew.ratio("שלום"), 1.0);
        assert!(Script::Hebrew.ratio("hello world") < 0.01);
        let mixed = Script::Hebrew.ratio("שלום hello");
        assert!(mixed > 0.3 && mixed < 0.5);
    }

    #[test]
    fn latin_counts_accented_letters() {
        assert_eq!(Script::Latin.ratio("café"), 1.0);
        assert_eq!(Script::Latin.ratio("ירושלים"), 0.0);
    }
}
