use regex::Regex;

use crate::site::{SortKeyPolicy, TitlePatternResolver};
use crate::wikitext::{Wikitext, WikitextError};

impl<S: TitlePatternResolver> Wikitext<'_, S> {
    /// Whether the text links the page into `name`, whatever the sort key.
    pub fn has_category(&self, name: &str) -> Result<bool, WikitextError> {
        let regex = self.category_regex(name, "")?;
        Ok(regex.is_match(self.text()))
    }

    /// Append `[[Category:name]]` (with `sort_key` if given) on a new line.
    /// Returns false when the category is already there.
    pub fn add_category(
        &mut self,
        name: &str,
        sort_key: Option<&str>,
    ) -> Result<bool, WikitextError> {
        if name.replace('_', " ").trim().is_empty() {
            return Err(WikitextError::EmptyCategoryName(name.to_string()));
        }
        if self.has_category(name)? {
            return Ok(false);
        }
        let link = self.site().render_category_link(name, sort_key);
        self.append(&format!("\n{link}"));
        Ok(true)
    }

    /// Remove every link to `name` together with the line break that follows
    /// it. Returns false when there was nothing to remove.
    pub fn remove_category(&mut self, name: &str) -> Result<bool, WikitextError> {
        if !self.has_category(name)? {
            return Ok(false);
        }
        let regex = self.category_regex(name, r"[ \t]*\r?\n?")?;
        self.replace(&regex, "", None)?;
        Ok(true)
    }

    fn category_regex(&self, name: &str, suffix: &str) -> Result<Regex, WikitextError> {
        let pattern = format!(
            "{}{suffix}",
            self.site().category_link_pattern(name, &SortKeyPolicy::Any)
        );
        Regex::new(&pattern).map_err(|source| WikitextError::InvalidPattern { pattern, source })
    }
}

#[cfg(test)]
mod tests {
    use crate::site::{Site, SiteRegistry};
    use crate::wikitext::{Wikitext, WikitextError};

    fn enwiki() -> std::sync::Arc<Site> {
        SiteRegistry::builtin().get("enwiki").expect("enwiki")
    }

    #[test]
    fn add_then_has_and_second_add_is_noop() {
        let site = enwiki();
        let mut doc = Wikitext::new(site.as_ref(), "Article body.");
        assert!(!doc.has_category("Foo").expect("pattern"));
        assert!(doc.add_category("Foo", None).expect("add"));
        assert!(doc.has_category("Foo").expect("pattern"));
        assert!(!doc.add_category("Foo", None).expect("add"));
        assert_eq!(doc.text(), "Article body.\n[[Category:Foo]]");
        assert_eq!(doc.appended(), "\n[[Category:Foo]]");
    }

    #[test]
    fn add_uses_sort_key_verbatim() {
        let site = enwiki();
        let mut doc = Wikitext::new(site.as_ref(), "");
        assert!(doc.add_category("People", Some("Doe, John")).expect("add"));
        assert_eq!(doc.text(), "\n[[Category:People|Doe, John]]");
    }

    #[test]
    fn existing_category_with_any_sort_key_blocks_add() {
        let site = enwiki();
        let mut doc = Wikitext::new(site.as_ref(), "x\n[[category:foo_bar | key]]");
        assert!(doc.has_category("Foo bar").expect("pattern"));
        assert!(!doc.add_category("Foo bar", Some("other")).expect("add"));
        assert!(doc.appended().is_empty());
    }

    #[test]
    fn remove_strips_link_and_trailing_newline() {
        let site = enwiki();
        let mut doc = Wikitext::new(
            site.as_ref(),
            "Text\n[[Category:Foo|Key]]\n[[Category:Bar]]\n",
        );
        assert!(doc.remove_category("Foo").expect("remove"));
        assert_eq!(doc.text(), "Text\n[[Category:Bar]]\n");
        assert!(!doc.has_category("Foo").expect("pattern"));
        assert!(doc.has_category("Bar").expect("pattern"));
        assert_eq!(doc.substitutions().len(), 1);
        assert_eq!(doc.substitutions()[0].from, "[[Category:Foo|Key]]\n");
        assert_eq!(doc.substitutions()[0].to, "");
        assert!(!doc.remove_category("Foo").expect("remove"));
    }

    #[test]
    fn remove_clears_duplicate_links() {
        let site = enwiki();
        let mut doc = Wikitext::new(site.as_ref(), "[[Category:Foo]]\nText\n[[Category:Foo]]");
        assert!(doc.remove_category("Foo").expect("remove"));
        assert_eq!(doc.text(), "Text\n");
        assert!(!doc.has_category("Foo").expect("pattern"));
    }

    #[test]
    fn remove_absent_category_changes_nothing() {
        let site = enwiki();
        let mut doc = Wikitext::new(site.as_ref(), "Text\n[[Category:Bar]]");
        assert!(!doc.remove_category("Foo").expect("remove"));
        assert_eq!(doc.text(), "Text\n[[Category:Bar]]");
        assert!(doc.substitutions().is_empty());
    }

    #[test]
    fn remove_after_add_keeps_preceding_text() {
        let site = enwiki();
        let mut doc = Wikitext::new(site.as_ref(), "Body\n");
        doc.add_category("Temp", None).expect("add");
        assert!(doc.remove_category("Temp").expect("remove"));
        assert_eq!(doc.text(), "Body\n\n");
    }

    #[test]
    fn remove_consumes_crlf_line_break() {
        let site = enwiki();
        let mut doc = Wikitext::new(site.as_ref(), "Text\r\n[[Category:Foo]]\r\nMore");
        assert!(doc.remove_category("Foo").expect("remove"));
        assert_eq!(doc.text(), "Text\r\nMore");
    }

    #[test]
    fn add_rejects_blank_name() {
        let site = enwiki();
        let mut doc = Wikitext::new(site.as_ref(), "Body");
        for name in ["", "   ", "_ _"] {
            let error = doc.add_category(name, None).expect_err("blank name");
            assert!(matches!(error, WikitextError::EmptyCategoryName(_)));
        }
        assert_eq!(doc.text(), "Body");
        assert!(!doc.is_changed());
    }
}
