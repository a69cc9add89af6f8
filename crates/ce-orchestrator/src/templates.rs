//! Template resolution and structural validation (§4.9 step 3, §6
//! `ValidateTemplates`).

use std::collections::{HashMap, HashSet};

use ce_domain::model::SectionSpec;
use ce_domain::{Error, Result};

use crate::request::TemplateInput;

/// Flatten requested templates into an ordered list of [`SectionSpec`]s,
/// preserving dependencies and original template grouping. Fails with
/// `InvalidRequest` on duplicate `section_id`s, unknown dependency targets,
/// or a dependency cycle (§6 `ValidateTemplates`, §8 boundary behavior).
pub fn resolve_and_validate(templates: &[TemplateInput]) -> Result<Vec<SectionSpec>> {
    let mut specs = Vec::new();
    let mut seen_ids = HashSet::new();
    let mut order_index = 0u32;

    for template in templates {
        if template.sections.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "template '{}' declares no sections",
                template.template_id
            )));
        }
        for section in &template.sections {
            if !seen_ids.insert(section.section_id.clone()) {
                return Err(Error::InvalidRequest(format!(
                    "duplicate section_id '{}' across templates",
                    section.section_id
                )));
            }
            specs.push(SectionSpec {
                template_id: template.template_id.clone(),
                section_id: section.section_id.clone(),
                section_type: section.section_type.clone(),
                prompt: section.prompt.clone(),
                order_index,
                depends_on: section.depends_on.clone(),
            });
            order_index += 1;
        }
    }

    for spec in &specs {
        for dep in &spec.depends_on {
            if !seen_ids.contains(dep) {
                return Err(Error::InvalidRequest(format!(
                    "section '{}' depends on unknown section_id '{}'",
                    spec.section_id, dep
                )));
            }
        }
    }

    detect_cycle(&specs)?;

    Ok(specs)
}

fn detect_cycle(specs: &[SectionSpec]) -> Result<()> {
    let by_id: HashMap<&str, &SectionSpec> = specs.iter().map(|s| (s.section_id.as_str(), s)).collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a SectionSpec>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<()> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(Error::InvalidRequest(format!(
                    "section dependency graph contains a cycle through '{id}'"
                )))
            }
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        if let Some(spec) = by_id.get(id) {
            for dep in &spec.depends_on {
                visit(dep, by_id, marks)?;
            }
        }
        marks.insert(id, Mark::Done);
        Ok(())
    }

    for spec in specs {
        visit(&spec.section_id, &by_id, &mut marks)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::SectionInput;
    use ce_domain::model::SectionType;

    fn section(id: &str, deps: &[&str]) -> SectionInput {
        SectionInput {
            section_id: id.to_string(),
            section_type: SectionType::Subjective,
            prompt: "p".to_string(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn flattens_preserving_order_and_grouping() {
        let templates = vec![TemplateInput {
            template_id: "soap".to_string(),
            sections: vec![section("s", &[]), section("o", &[]), section("a", &["s", "o"])],
        }];
        let specs = resolve_and_validate(&templates).unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[2].section_id, "a");
        assert_eq!(specs[2].depends_on, vec!["s", "o"]);
    }

    #[test]
    fn duplicate_section_id_is_rejected() {
        let templates = vec![TemplateInput {
            template_id: "t".to_string(),
            sections: vec![section("s", &[]), section("s", &[])],
        }];
        assert!(matches!(
            resolve_and_validate(&templates),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let templates = vec![TemplateInput {
            template_id: "t".to_string(),
            sections: vec![section("s", &["ghost"])],
        }];
        assert!(matches!(
            resolve_and_validate(&templates),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn cycle_is_rejected() {
        let templates = vec![TemplateInput {
            template_id: "t".to_string(),
            sections: vec![section("a", &["b"]), section("b", &["a"])],
        }];
        assert!(matches!(
            resolve_and_validate(&templates),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn empty_depends_on_is_schedulable_immediately() {
        let templates = vec![TemplateInput {
            template_id: "t".to_string(),
            sections: vec![section("s", &[])],
        }];
        let specs = resolve_and_validate(&templates).unwrap();
        assert!(specs[0].depends_on.is_empty());
    }
}
