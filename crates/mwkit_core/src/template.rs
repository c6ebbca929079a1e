use regex::{Captures, Regex};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Group(usize),
}

/// A replacement template resolved against the groups of one regex.
///
/// Recognized placeholders are `\N`, `$N`, `${N}`, `\name`, `$name` and
/// `${name}`. At each placeholder the longest reference naming an existing
/// group wins, so with three groups `$10` is group 1 followed by `0`, while
/// with ten groups it is group 10. Anything else is copied verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementTemplate {
    segments: Vec<Segment>,
}

impl ReplacementTemplate {
    pub fn compile(template: &str, regex: &Regex) -> Self {
        let groups = GroupTable::of(regex);
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while let Some(ch) = rest.chars().next() {
            if (ch == '\\' || ch == '$')
                && let Some((index, consumed)) = groups.parse_reference(&rest[1..], ch == '$')
            {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Group(index));
                rest = &rest[1 + consumed..];
                continue;
            }
            literal.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self { segments }
    }

    /// Expand the template for one match. Groups that did not participate in
    /// the match expand to nothing.
    pub fn render(&self, captures: &Captures<'_>) -> String {
        let mut output = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => output.push_str(text),
                Segment::Group(index) => {
                    if let Some(found) = captures.get(*index) {
                        output.push_str(found.as_str());
                    }
                }
            }
        }
        output
    }
}

struct GroupTable {
    len: usize,
    names: Vec<(String, usize)>,
}

impl GroupTable {
    fn of(regex: &Regex) -> Self {
        let names = regex
            .capture_names()
            .enumerate()
            .filter_map(|(index, name)| name.map(|name| (name.to_string(), index)))
            .collect();
        Self {
            len: regex.captures_len(),
            names,
        }
    }

    fn index_of_name(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, index)| *index)
    }

    fn index_of_number(&self, digits: &str) -> Option<usize> {
        digits
            .parse::<usize>()
            .ok()
            .filter(|index| *index < self.len)
    }

    /// Returns the group index and the number of bytes consumed after the sigil.
    fn parse_reference(&self, after: &str, braces_allowed: bool) -> Option<(usize, usize)> {
        if braces_allowed && let Some(inner) = after.strip_prefix('{') {
            let end = inner.find('}')?;
            let reference = &inner[..end];
            let index = if reference.bytes().all(|byte| byte.is_ascii_digit()) {
                self.index_of_number(reference)
            } else {
                self.index_of_name(reference)
            }?;
            return Some((index, end + 2));
        }

        let digits = leading_len(after, |byte| byte.is_ascii_digit());
        if digits > 0 {
            return (1..=digits)
                .rev()
                .find_map(|len| self.index_of_number(&after[..len]).map(|index| (index, len)));
        }

        let starts_identifier = after
            .bytes()
            .next()
            .is_some_and(|byte| byte.is_ascii_alphabetic() || byte == b'_');
        if !starts_identifier {
            return None;
        }
        let word = leading_len(after, |byte| byte.is_ascii_alphanumeric() || byte == b'_');
        (1..=word)
            .rev()
            .find_map(|len| self.index_of_name(&after[..len]).map(|index| (index, len)))
    }
}

fn leading_len(text: &str, accept: impl Fn(u8) -> bool) -> usize {
    text.bytes().take_while(|byte| accept(*byte)).count()
}

#[cfg(test)]
mod tests {
    use regex::Regex;

    use super::ReplacementTemplate;

    fn expand(pattern: &str, template: &str, haystack: &str) -> String {
        let regex = Regex::new(pattern).expect("regex");
        let captures = regex.captures(haystack).expect("match");
        ReplacementTemplate::compile(template, &regex).render(&captures)
    }

    #[test]
    fn all_numbered_spellings_expand() {
        assert_eq!(expand(r"foo(\d+)", r"bar$1", "foo7"), "bar7");
        assert_eq!(expand(r"foo(\d+)", r"bar\1", "foo7"), "bar7");
        assert_eq!(expand(r"foo(\d+)", r"bar${1}x", "foo7"), "bar7x");
        assert_eq!(expand(r"foo(\d+)", r"[$0]", "foo7"), "[foo7]");
    }

    #[test]
    fn longest_valid_group_number_wins() {
        assert_eq!(expand(r"(a)(b)(c)", "$10", "abc"), "a0");
        let ten = r"(a)(b)(c)(d)(e)(f)(g)(h)(i)(j)";
        assert_eq!(expand(ten, "$10", "abcdefghij"), "j");
        assert_eq!(expand(ten, "$1", "abcdefghij"), "a");
        assert_eq!(expand(ten, "${1}0", "abcdefghij"), "a0");
    }

    #[test]
    fn named_groups_expand() {
        let pattern = r"(?P<word>[a-z]+)-(?P<num>\d+)";
        assert_eq!(expand(pattern, "${num}:${word}", "abc-12"), "12:abc");
        assert_eq!(expand(pattern, "$num/$word", "abc-12"), "12/abc");
        assert_eq!(expand(pattern, r"\word", "abc-12"), "abc");
    }

    #[test]
    fn unknown_references_are_verbatim() {
        assert_eq!(expand(r"(x)", "$5 ${nope} $ \\ $$", "x"), "$5 ${nope} $ \\ $$");
        assert_eq!(expand(r"(x)", "cost: $", "x"), "cost: $");
        assert_eq!(expand(r"(x)", "${1", "x"), "${1");
    }

    #[test]
    fn unmatched_optional_group_is_empty() {
        assert_eq!(expand(r"a(b)?c", "[$1]", "ac"), "[]");
    }

    #[test]
    fn template_without_groups_is_literal() {
        let regex = Regex::new("x").expect("regex");
        let template = ReplacementTemplate::compile("plain → text", &regex);
        let captures = regex.captures("x").expect("match");
        assert_eq!(template.render(&captures), "plain → text");
    }
}
