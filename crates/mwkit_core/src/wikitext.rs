use std::borrow::Cow;
use std::collections::BTreeMap;

use regex::{Captures, Regex};
use serde::Serialize;

use crate::site::TitlePatternResolver;
use crate::template::ReplacementTemplate;

#[derive(Debug, thiserror::Error)]
pub enum WikitextError {
    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("category name `{0}` is empty")]
    EmptyCategoryName(String),
}

/// One replaced match: `from` was removed from the text and `to` took its place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Substitution {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy)]
pub enum Pattern<'p> {
    Source(&'p str),
    Compiled(&'p Regex),
}

impl<'p> Pattern<'p> {
    fn compile(self) -> Result<Cow<'p, Regex>, WikitextError> {
        match self {
            Self::Compiled(regex) => Ok(Cow::Borrowed(regex)),
            Self::Source(source) => {
                Regex::new(source)
                    .map(Cow::Owned)
                    .map_err(|source_error| WikitextError::InvalidPattern {
                        pattern: source.to_string(),
                        source: source_error,
                    })
            }
        }
    }
}

impl<'p> From<&'p str> for Pattern<'p> {
    fn from(source: &'p str) -> Self {
        Self::Source(source)
    }
}

impl<'p> From<&'p String> for Pattern<'p> {
    fn from(source: &'p String) -> Self {
        Self::Source(source.as_str())
    }
}

impl<'p> From<&'p Regex> for Pattern<'p> {
    fn from(regex: &'p Regex) -> Self {
        Self::Compiled(regex)
    }
}

/// One pattern or an ordered list of patterns, applied left to right.
#[derive(Debug, Clone)]
pub struct Patterns<'p>(Vec<Pattern<'p>>);

impl<'p> Patterns<'p> {
    /// Compile everything up front so a bad pattern late in the list cannot
    /// leave the text half rewritten.
    fn compile(self) -> Result<Vec<Cow<'p, Regex>>, WikitextError> {
        self.0.into_iter().map(Pattern::compile).collect()
    }
}

impl<'p> From<Pattern<'p>> for Patterns<'p> {
    fn from(pattern: Pattern<'p>) -> Self {
        Self(vec![pattern])
    }
}

impl<'p> From<&'p str> for Patterns<'p> {
    fn from(source: &'p str) -> Self {
        Self(vec![Pattern::Source(source)])
    }
}

impl<'p> From<&'p String> for Patterns<'p> {
    fn from(source: &'p String) -> Self {
        Self(vec![Pattern::Source(source.as_str())])
    }
}

impl<'p> From<&'p Regex> for Patterns<'p> {
    fn from(regex: &'p Regex) -> Self {
        Self(vec![Pattern::Compiled(regex)])
    }
}

impl<'p> From<&[&'p str]> for Patterns<'p> {
    fn from(sources: &[&'p str]) -> Self {
        Self(sources.iter().copied().map(Pattern::Source).collect())
    }
}

impl<'p, const N: usize> From<[&'p str; N]> for Patterns<'p> {
    fn from(sources: [&'p str; N]) -> Self {
        Self(sources.into_iter().map(Pattern::Source).collect())
    }
}

impl<'p> From<Vec<&'p str>> for Patterns<'p> {
    fn from(sources: Vec<&'p str>) -> Self {
        Self(sources.into_iter().map(Pattern::Source).collect())
    }
}

impl<'p> From<&'p [String]> for Patterns<'p> {
    fn from(sources: &'p [String]) -> Self {
        Self(sources.iter().map(|source| Pattern::Source(source)).collect())
    }
}

impl<'p> From<&'p [Regex]> for Patterns<'p> {
    fn from(regexes: &'p [Regex]) -> Self {
        Self(regexes.iter().map(Pattern::Compiled).collect())
    }
}

/// An owned copy of one match and its groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    groups: Vec<Option<String>>,
    names: BTreeMap<String, usize>,
}

impl Captured {
    fn new(regex: &Regex, captures: &Captures<'_>) -> Self {
        let groups = captures
            .iter()
            .map(|group| group.map(|found| found.as_str().to_string()))
            .collect();
        let names = regex
            .capture_names()
            .enumerate()
            .filter_map(|(index, name)| name.map(|name| (name.to_string(), index)))
            .collect();
        Self { groups, names }
    }

    /// The whole matched text.
    pub fn whole(&self) -> &str {
        self.get(0).unwrap_or_default()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|group| group.as_deref())
    }

    pub fn name(&self, name: &str) -> Option<&str> {
        self.names.get(name).and_then(|index| self.get(*index))
    }

    /// Number of groups including the whole match.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Group text keyed by number and by name. Groups that did not take part
    /// in the match map to an empty string.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for (index, group) in self.groups.iter().enumerate() {
            map.insert(index.to_string(), group.clone().unwrap_or_default());
        }
        for (name, index) in &self.names {
            map.insert(name.clone(), self.get(*index).unwrap_or_default().to_string());
        }
        map
    }
}

/// A page's wikitext together with the record of every edit made to it.
pub struct Wikitext<'s, S> {
    site: &'s S,
    text: String,
    prepended: String,
    appended: String,
    substitutions: Vec<Substitution>,
}

impl<'s, S: TitlePatternResolver> Wikitext<'s, S> {
    pub fn new(site: &'s S, text: impl Into<String>) -> Self {
        Self {
            site,
            text: text.into(),
            prepended: String::new(),
            appended: String::new(),
            substitutions: Vec::new(),
        }
    }

    pub fn site(&self) -> &'s S {
        self.site
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Replace the whole buffer. This is not an edit: nothing is logged.
    pub fn set_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = text.into();
        self
    }

    pub fn append(&mut self, text: &str) -> &mut Self {
        self.appended.push_str(text);
        self.text.push_str(text);
        self
    }

    pub fn prepend(&mut self, text: &str) -> &mut Self {
        self.prepended.insert_str(0, text);
        self.text.insert_str(0, text);
        self
    }

    /// Everything appended so far, in call order.
    pub fn appended(&self) -> &str {
        &self.appended
    }

    /// Everything prepended so far, as it now reads at the head of the text.
    pub fn prepended(&self) -> &str {
        &self.prepended
    }

    pub fn substitutions(&self) -> &[Substitution] {
        &self.substitutions
    }

    pub fn is_match<'p>(&self, pattern: impl Into<Pattern<'p>>) -> Result<bool, WikitextError> {
        let regex = pattern.into().compile()?;
        Ok(regex.is_match(&self.text))
    }

    /// First match of `pattern`, if any.
    pub fn find<'p>(
        &self,
        pattern: impl Into<Pattern<'p>>,
    ) -> Result<Option<Captured>, WikitextError> {
        let regex = pattern.into().compile()?;
        Ok(regex
            .captures(&self.text)
            .map(|captures| Captured::new(&regex, &captures)))
    }

    pub fn match_all<'p>(
        &self,
        pattern: impl Into<Pattern<'p>>,
    ) -> Result<Vec<Captured>, WikitextError> {
        let regex = pattern.into().compile()?;
        Ok(regex
            .captures_iter(&self.text)
            .map(|captures| Captured::new(&regex, &captures))
            .collect())
    }

    /// Replace matches of each pattern with `template`, where `$1`, `\1`,
    /// `${1}` and `${name}` stand for captured groups.
    ///
    /// Patterns run left to right, each over the text the previous one left.
    /// `limit` caps the replacements per pattern; `None` means all of them.
    pub fn replace<'p>(
        &mut self,
        patterns: impl Into<Patterns<'p>>,
        template: &str,
        limit: Option<usize>,
    ) -> Result<&mut Self, WikitextError> {
        for regex in patterns.into().compile()? {
            let template = ReplacementTemplate::compile(template, &regex);
            self.rewrite(&regex, limit, |captures| template.render(captures));
        }
        Ok(self)
    }

    /// Like [`Wikitext::replace`], but each replacement is whatever `callback`
    /// returns for the match.
    pub fn replace_with_callback<'p, F>(
        &mut self,
        patterns: impl Into<Patterns<'p>>,
        mut callback: F,
        limit: Option<usize>,
    ) -> Result<&mut Self, WikitextError>
    where
        F: FnMut(&Captured) -> String,
    {
        for regex in patterns.into().compile()? {
            self.rewrite(&regex, limit, |captures| {
                callback(&Captured::new(&regex, captures))
            });
        }
        Ok(self)
    }

    /// Plain substring replacement of every occurrence of `search`.
    pub fn replace_literal(&mut self, search: &str, replacement: &str) -> &mut Self {
        if search.is_empty() {
            return self;
        }
        let count = self.text.matches(search).count();
        if count == 0 {
            return self;
        }
        self.text = self.text.replace(search, replacement);
        for _ in 0..count {
            self.substitutions.push(Substitution {
                from: search.to_string(),
                to: replacement.to_string(),
            });
        }
        self
    }

    /// Rewrite the buffer in a single pass over one regex. The substitution
    /// log and the new text come from the same sequence of matches.
    fn rewrite<F>(&mut self, regex: &Regex, limit: Option<usize>, mut replacement: F)
    where
        F: FnMut(&Captures<'_>) -> String,
    {
        let mut output = String::with_capacity(self.text.len());
        let mut performed = Vec::new();
        let mut last_end = 0;

        for captures in regex
            .captures_iter(&self.text)
            .take(limit.unwrap_or(usize::MAX))
        {
            let whole = captures.get_match();
            let to = replacement(&captures);
            output.push_str(&self.text[last_end..whole.start()]);
            output.push_str(&to);
            performed.push(Substitution {
                from: whole.as_str().to_string(),
                to,
            });
            last_end = whole.end();
        }

        if performed.is_empty() {
            return;
        }
        output.push_str(&self.text[last_end..]);
        self.text = output;
        self.substitutions.extend(performed);
    }
}

#[cfg(test)]
mod tests {
    use regex::Regex;

    use super::{Substitution, Wikitext, WikitextError};
    use crate::site::{SortKeyPolicy, TitlePatternResolver};

    struct NoSite;

    impl TitlePatternResolver for NoSite {
        fn category_link_pattern(&self, name: &str, _sort_key: &SortKeyPolicy) -> String {
            format!(r"\[\[Category:{}\]\]", regex::escape(name))
        }

        fn render_category_link(&self, name: &str, _sort_key: Option<&str>) -> String {
            format!("[[Category:{name}]]")
        }
    }

    fn pair(from: &str, to: &str) -> Substitution {
        Substitution {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    #[test]
    fn replace_logs_one_entry_per_match() {
        let mut doc = Wikitext::new(&NoSite, "foo1 foo2");
        doc.replace(r"foo(\d+)", "bar$1", None).expect("replace");
        assert_eq!(doc.text(), "bar1 bar2");
        assert_eq!(
            doc.substitutions(),
            &[pair("foo1", "bar1"), pair("foo2", "bar2")]
        );
    }

    #[test]
    fn replace_without_matches_is_a_noop() {
        let mut doc = Wikitext::new(&NoSite, "nothing here");
        doc.replace(r"foo(\d+)", "bar$1", None).expect("replace");
        assert_eq!(doc.text(), "nothing here");
        assert!(doc.substitutions().is_empty());
    }

    #[test]
    fn replace_limit_caps_rewrites_and_log_together() {
        let mut doc = Wikitext::new(&NoSite, "a a a");
        doc.replace("a", "b", Some(2)).expect("replace");
        assert_eq!(doc.text(), "b b a");
        assert_eq!(doc.substitutions().len(), 2);
    }

    #[test]
    fn pattern_lists_apply_in_order() {
        let mut doc = Wikitext::new(&NoSite, "cat dog");
        doc.replace(["cat", "dog"], "pet", None).expect("replace");
        assert_eq!(doc.text(), "pet pet");
        assert_eq!(doc.substitutions(), &[pair("cat", "pet"), pair("dog", "pet")]);

        let mut chained = Wikitext::new(&NoSite, "a");
        chained.replace(["a", "b"], "b", None).expect("replace");
        assert_eq!(chained.text(), "b");
        assert_eq!(chained.substitutions(), &[pair("a", "b"), pair("b", "b")]);
    }

    #[test]
    fn invalid_pattern_fails_before_any_change() {
        let mut doc = Wikitext::new(&NoSite, "abc");
        let error = doc
            .replace(["b", "(unclosed"], "x", None)
            .err()
            .expect("invalid pattern");
        assert!(matches!(error, WikitextError::InvalidPattern { .. }));
        assert!(error.to_string().contains("(unclosed"));
        assert_eq!(doc.text(), "abc");
        assert!(doc.substitutions().is_empty());
        assert!(doc.is_match("[").is_err());
    }

    #[test]
    fn precompiled_patterns_are_accepted() {
        let regexes = vec![Regex::new(r"(\w+)@").expect("regex")];
        let mut doc = Wikitext::new(&NoSite, "me@ you@");
        doc.replace(regexes.as_slice(), "<$1>", None).expect("replace");
        assert_eq!(doc.text(), "<me> <you>");
    }

    #[test]
    fn callback_output_is_logged_and_written() {
        let mut doc = Wikitext::new(&NoSite, "x=1, y=22");
        doc.replace_with_callback(
            r"(?P<key>\w)=(?P<value>\d+)",
            |found| {
                let map = found.to_map();
                format!("{}:{}", map["key"], map["2"].len())
            },
            None,
        )
        .expect("replace");
        assert_eq!(doc.text(), "x:1, y:2");
        assert_eq!(doc.substitutions(), &[pair("x=1", "x:1"), pair("y=22", "y:2")]);
    }

    #[test]
    fn replace_literal_counts_real_occurrences() {
        let mut doc = Wikitext::new(&NoSite, "x-x-x");
        doc.replace_literal("x", "y");
        assert_eq!(doc.text(), "y-y-y");
        assert_eq!(doc.substitutions().len(), 3);

        doc.replace_literal("missing", "z").replace_literal("", "z");
        assert_eq!(doc.text(), "y-y-y");
        assert_eq!(doc.substitutions().len(), 3);
    }

    #[test]
    fn replace_literal_does_not_treat_search_as_pattern() {
        let mut doc = Wikitext::new(&NoSite, "a.b axb");
        doc.replace_literal("a.b", "$1");
        assert_eq!(doc.text(), "$1 axb");
    }

    #[test]
    fn append_and_prepend_track_fragments() {
        let mut doc = Wikitext::new(&NoSite, "body");
        doc.append("\none").append("\ntwo").prepend("head\n").prepend("top\n");
        assert_eq!(doc.text(), "top\nhead\nbody\none\ntwo");
        assert!(doc.text().ends_with("\ntwo"));
        assert_eq!(doc.appended(), "\none\ntwo");
        assert_eq!(doc.prepended(), "top\nhead\n");
        assert!(doc.substitutions().is_empty());
    }

    #[test]
    fn match_helpers_expose_groups() {
        let doc = Wikitext::new(&NoSite, "{{Born|1901}} {{Born|1955}}");
        assert!(doc.is_match(r"\{\{Born").expect("pattern"));
        let all = doc.match_all(r"\{\{Born\|(?P<year>\d{4})\}\}").expect("pattern");
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].name("year"), Some("1955"));
        assert_eq!(all[0].get(1), Some("1901"));
        assert_eq!(all[0].whole(), "{{Born|1901}}");

        let first = doc.find(r"(\d+)").expect("pattern").expect("match");
        assert_eq!(first.get(1), Some("1901"));
        assert!(doc.find("nope").expect("pattern").is_none());
    }

    #[test]
    fn set_text_replaces_buffer_without_logging() {
        let mut doc = Wikitext::new(&NoSite, "old");
        doc.set_text("");
        assert_eq!(doc.text(), "");
        assert!(doc.substitutions().is_empty());
        assert_eq!(doc.into_text(), "");
    }
}
