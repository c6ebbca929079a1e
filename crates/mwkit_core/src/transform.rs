use anyhow::{Result, bail};
use serde::Serialize;

use crate::site::TitlePatternResolver;
use crate::wikitext::Wikitext;

/// A declarative edit, as collected from the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TransformStep {
    AddCategory {
        name: String,
        sort_key: Option<String>,
    },
    RemoveCategory {
        name: String,
    },
    Replace {
        pattern: String,
        template: String,
        limit: Option<usize>,
    },
    ReplaceLiteral {
        search: String,
        replacement: String,
    },
    Append {
        text: String,
    },
    Prepend {
        text: String,
    },
}

impl TransformStep {
    /// Parse `PATTERN=>TEMPLATE` into a replace step.
    pub fn parse_replace(spec: &str, literal: bool) -> Result<Self> {
        let Some((left, right)) = spec.split_once("=>") else {
            bail!("replacement `{spec}` must look like PATTERN=>TEMPLATE");
        };
        if left.is_empty() {
            bail!("replacement `{spec}` has an empty pattern");
        }
        Ok(if literal {
            Self::ReplaceLiteral {
                search: left.to_string(),
                replacement: right.to_string(),
            }
        } else {
            Self::Replace {
                pattern: left.to_string(),
                template: right.to_string(),
                limit: None,
            }
        })
    }

    pub fn apply<S: TitlePatternResolver>(&self, doc: &mut Wikitext<'_, S>) -> Result<()> {
        match self {
            Self::AddCategory { name, sort_key } => {
                doc.add_category(name, sort_key.as_deref())?;
            }
            Self::RemoveCategory { name } => {
                doc.remove_category(name)?;
            }
            Self::Replace {
                pattern,
                template,
                limit,
            } => {
                doc.replace(pattern, template, *limit)?;
            }
            Self::ReplaceLiteral {
                search,
                replacement,
            } => {
                doc.replace_literal(search, replacement);
            }
            Self::Append { text } => {
                doc.append(text);
            }
            Self::Prepend { text } => {
                doc.prepend(text);
            }
        }
        Ok(())
    }
}

pub fn apply_steps<S: TitlePatternResolver>(
    doc: &mut Wikitext<'_, S>,
    steps: &[TransformStep],
) -> Result<()> {
    for step in steps {
        step.apply(doc)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{TransformStep, apply_steps};
    use crate::site::SiteRegistry;
    use crate::wikitext::Wikitext;

    #[test]
    fn parse_replace_splits_on_arrow() {
        assert_eq!(
            TransformStep::parse_replace(r"colou?r=>hue", false).expect("parse"),
            TransformStep::Replace {
                pattern: "colou?r".to_string(),
                template: "hue".to_string(),
                limit: None,
            }
        );
        assert_eq!(
            TransformStep::parse_replace("a=>", true).expect("parse"),
            TransformStep::ReplaceLiteral {
                search: "a".to_string(),
                replacement: String::new(),
            }
        );
        assert!(TransformStep::parse_replace("no arrow", false).is_err());
        assert!(TransformStep::parse_replace("=>x", false).is_err());
    }

    #[test]
    fn steps_apply_in_order() {
        let site = SiteRegistry::builtin().get("enwiki").expect("enwiki");
        let mut doc = Wikitext::new(site.as_ref(), "Intro\n[[Category:Old]]\n");
        apply_steps(
            &mut doc,
            &[
                TransformStep::RemoveCategory {
                    name: "Old".to_string(),
                },
                TransformStep::AddCategory {
                    name: "New".to_string(),
                    sort_key: None,
                },
                TransformStep::Replace {
                    pattern: "Intro".to_string(),
                    template: "Lead".to_string(),
                    limit: None,
                },
                TransformStep::Prepend {
                    text: "{{Notice}}\n".to_string(),
                },
            ],
        )
        .expect("apply");
        assert_eq!(doc.text(), "{{Notice}}\nLead\n\n[[Category:New]]");
        assert_eq!(doc.count_substitutions(), 2);
    }

    #[test]
    fn invalid_pattern_step_is_an_error() {
        let site = SiteRegistry::builtin().get("enwiki").expect("enwiki");
        let mut doc = Wikitext::new(site.as_ref(), "text");
        let error = apply_steps(
            &mut doc,
            &[TransformStep::Replace {
                pattern: "(".to_string(),
                template: String::new(),
                limit: None,
            }],
        )
        .expect_err("bad pattern");
        assert!(error.to_string().contains("invalid pattern"));
    }
}
