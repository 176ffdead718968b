//! Classifies containers against a gear's file inputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::containers::Container;
use crate::gears::Gear;
use crate::identifiers::{ContainerReference, FileReference};

/// A container whose inputs resolved to exactly one file each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedContainer {
    pub container: ContainerReference,
    pub inputs: BTreeMap<String, FileReference>,
}

/// Every candidate container lands in exactly one of the three lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchReport {
    pub matched: Vec<MatchedContainer>,
    pub not_matched: Vec<ContainerReference>,
    pub ambiguous: Vec<ContainerReference>,
}

impl MatchReport {
    pub fn len(&self) -> usize {
        self.matched.len() + self.not_matched.len() + self.ambiguous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Verdict {
    Matched(BTreeMap<String, FileReference>),
    NotMatched,
    Ambiguous,
}

fn classify(gear: &Gear, container: &Container) -> Verdict {
    let mut inputs = BTreeMap::new();
    let mut ambiguous = false;

    for (name, spec) in gear.file_inputs() {
        let mut candidates = container
            .files
            .iter()
            .filter(|file| gear.accepts(name, file));
        let first = candidates.next();
        let more = candidates.next().is_some();

        match (first, more) {
            (None, _) if spec.optional => {}
            (None, _) => return Verdict::NotMatched,
            (Some(_), true) => ambiguous = true,
            (Some(file), false) => {
                inputs.insert(name.clone(), container.file_reference(file));
            }
        }
    }

    if ambiguous {
        Verdict::Ambiguous
    } else {
        Verdict::Matched(inputs)
    }
}

/// Partition `containers` by how their files satisfy the gear's inputs.
///
/// Containers not of `container_type` are reported as not matched. A
/// container with one unsatisfiable required input is not matched even if
/// another input is ambiguous.
pub fn find_matching_containers(
    gear: &Gear,
    containers: &[Container],
    container_type: &str,
) -> MatchReport {
    let mut report = MatchReport::default();
    for container in containers {
        let reference = container.reference.clone();
        if reference.container_type != container_type {
            report.not_matched.push(reference);
            continue;
        }
        match classify(gear, container) {
            Verdict::Matched(inputs) => report.matched.push(MatchedContainer {
                container: reference,
                inputs,
            }),
            Verdict::NotMatched => report.not_matched.push(reference),
            Verdict::Ambiguous => report.ambiguous.push(reference),
        }
    }
    report
}

/// Candidate files of one container for each file input of the gear.
pub fn suggest(gear: &Gear, container: &Container) -> BTreeMap<String, Vec<FileReference>> {
    gear.file_inputs()
        .map(|(name, _)| {
            let files = container
                .files
                .iter()
                .filter(|file| gear.accepts(name, file))
                .map(|file| container.file_reference(file))
                .collect();
            (name.clone(), files)
        })
        .collect()
}
