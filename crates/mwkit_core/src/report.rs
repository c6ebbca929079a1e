use indexmap::IndexMap;
use serde::Serialize;

use crate::site::TitlePatternResolver;
use crate::wikitext::Wikitext;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniqueSubstitution {
    pub from: String,
    pub to: String,
    pub count: usize,
}

impl UniqueSubstitution {
    /// `a → b (N times)`, or `(1 time)` for a single occurrence.
    pub fn human(&self) -> String {
        let times = if self.count == 1 {
            "1 time".to_string()
        } else {
            format!("{} times", self.count)
        };
        format!("{} → {} ({times})", self.from, self.to)
    }
}

/// Serializable snapshot of what a transform session did to a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub changed: bool,
    pub substitution_count: usize,
    pub unique_substitutions: Vec<UniqueSubstitution>,
    pub prepended: String,
    pub appended: String,
}

impl<S: TitlePatternResolver> Wikitext<'_, S> {
    pub fn count_substitutions(&self) -> usize {
        self.substitutions().len()
    }

    /// True once anything was replaced, prepended or appended.
    pub fn is_changed(&self) -> bool {
        self.count_substitutions() > 0 || !self.prepended().is_empty() || !self.appended().is_empty()
    }

    /// Substitutions with repetitions folded into a count, ordered by first
    /// appearance of `from`, then of `to`.
    pub fn unique_substitutions(&self) -> Vec<UniqueSubstitution> {
        let mut seen: IndexMap<&str, IndexMap<&str, usize>> = IndexMap::new();
        for substitution in self.substitutions() {
            let targets = seen
                .entry(substitution.from.as_str())
                .or_insert_with(IndexMap::new);
            let count = targets.entry(substitution.to.as_str()).or_insert(0);
            *count += 1;
        }

        seen.into_iter()
            .flat_map(|(from, targets)| {
                targets.into_iter().map(move |(to, count)| UniqueSubstitution {
                    from: from.to_string(),
                    to: to.to_string(),
                    count,
                })
            })
            .collect()
    }

    pub fn human_report(&self) -> Vec<String> {
        self.unique_substitutions()
            .iter()
            .map(UniqueSubstitution::human)
            .collect()
    }

    pub fn change_summary(&self) -> ChangeSummary {
        ChangeSummary {
            changed: self.is_changed(),
            substitution_count: self.count_substitutions(),
            unique_substitutions: self.unique_substitutions(),
            prepended: self.prepended().to_string(),
            appended: self.appended().to_string(),
        }
    }

    /// The human report joined with `"; "`, cut at `max_chars` characters
    /// with a trailing `…` when it does not fit.
    pub fn edit_summary(&self, max_chars: usize) -> String {
        let joined = self.human_report().join("; ");
        if joined.chars().count() <= max_chars {
            return joined;
        }
        if max_chars == 0 {
            return String::new();
        }
        let mut cut: String = joined.chars().take(max_chars - 1).collect();
        cut.push('…');
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::UniqueSubstitution;
    use crate::site::SiteRegistry;
    use crate::wikitext::Wikitext;

    #[test]
    fn fresh_document_is_unchanged() {
        let site = SiteRegistry::builtin().get("enwiki").expect("enwiki");
        let doc = Wikitext::new(site.as_ref(), "text");
        assert!(!doc.is_changed());
        assert_eq!(doc.count_substitutions(), 0);
        assert!(doc.unique_substitutions().is_empty());
        assert!(doc.human_report().is_empty());
    }

    #[test]
    fn append_or_prepend_alone_marks_changed() {
        let site = SiteRegistry::builtin().get("enwiki").expect("enwiki");
        let mut appended = Wikitext::new(site.as_ref(), "");
        appended.append("x");
        assert!(appended.is_changed());

        let mut prepended = Wikitext::new(site.as_ref(), "");
        prepended.prepend("x");
        assert!(prepended.is_changed());

        let mut noop = Wikitext::new(site.as_ref(), "abc");
        noop.replace("zzz", "y", None).expect("replace");
        assert!(!noop.is_changed());
    }

    #[test]
    fn repeated_literal_replacements_fold_into_one_entry() {
        let site = SiteRegistry::builtin().get("enwiki").expect("enwiki");
        let mut doc = Wikitext::new(site.as_ref(), "x x x");
        doc.replace_literal("x", "y");
        assert_eq!(doc.count_substitutions(), 3);
        assert_eq!(
            doc.unique_substitutions(),
            vec![UniqueSubstitution {
                from: "x".to_string(),
                to: "y".to_string(),
                count: 3,
            }]
        );
        assert_eq!(doc.human_report(), vec!["x → y (3 times)".to_string()]);
    }

    #[test]
    fn unique_order_follows_first_appearance() {
        let site = SiteRegistry::builtin().get("enwiki").expect("enwiki");
        let mut doc = Wikitext::new(site.as_ref(), "b1 a1 b2 b1");
        doc.replace(r"([ab])(\d)", "${1}_", None).expect("replace");
        doc.replace_literal("a_", "A");
        let report = doc.human_report();
        assert_eq!(
            report,
            vec![
                "b1 → b_ (2 times)".to_string(),
                "a1 → a_ (1 time)".to_string(),
                "b2 → b_ (1 time)".to_string(),
                "a_ → A (1 time)".to_string(),
            ]
        );
    }

    #[test]
    fn same_source_with_different_targets_stays_grouped() {
        let site = SiteRegistry::builtin().get("enwiki").expect("enwiki");
        let mut doc = Wikitext::new(site.as_ref(), "k k k");
        let mut counter = 0;
        doc.replace_with_callback(
            "k",
            |_| {
                counter += 1;
                if counter == 2 { "m".to_string() } else { "n".to_string() }
            },
            None,
        )
        .expect("replace");
        let unique = doc.unique_substitutions();
        assert_eq!(unique.len(), 2);
        assert_eq!((unique[0].to.as_str(), unique[0].count), ("n", 2));
        assert_eq!((unique[1].to.as_str(), unique[1].count), ("m", 1));
    }

    #[test]
    fn summary_and_edit_summary_reflect_current_state() {
        let site = SiteRegistry::builtin().get("enwiki").expect("enwiki");
        let mut doc = Wikitext::new(site.as_ref(), "colour colour");
        doc.replace_literal("colour", "color");
        doc.add_category("American English", None).expect("add");

        let summary = doc.change_summary();
        assert!(summary.changed);
        assert_eq!(summary.substitution_count, 2);
        assert_eq!(summary.appended, "\n[[Category:American English]]");
        assert_eq!(doc.edit_summary(200), "colour → color (2 times)");
        assert_eq!(doc.edit_summary(10), "colour → …");
    }

    #[test]
    fn edit_summary_never_exceeds_max_chars() {
        let site = SiteRegistry::builtin().get("enwiki").expect("enwiki");
        let mut doc = Wikitext::new(site.as_ref(), "colour");
        doc.replace_literal("colour", "color");
        assert_eq!(doc.edit_summary(0), "");
        assert_eq!(doc.edit_summary(1), "…");
        for max in 0..30 {
            assert!(doc.edit_summary(max).chars().count() <= max);
        }
    }
}
