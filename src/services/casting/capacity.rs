use crate::core::error::CastingError;
use crate::core::state::{Character, Gender};
use crate::services::catalog::{ExclusionSet, VoiceCatalog};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityReport {
    pub female_needed: usize,
    pub female_available: usize,
    pub male_needed: usize,
    pub male_available: usize,
}

impl CapacityReport {
    pub fn is_satisfiable(&self) -> bool {
        self.female_needed <= self.female_available && self.male_needed <= self.male_available
    }
}

/// Counts characters needing a voice against the voices still free.
///
/// Female characters draw from female voices; male and unknown characters
/// draw from male voices. Neutral voices are not counted for either side.
pub fn capacity_report(
    characters: &[Character],
    catalog: &VoiceCatalog,
    exclusions: &ExclusionSet,
) -> CapacityReport {
    let female_needed = characters
        .iter()
        .filter(|c| c.gender == Gender::Female)
        .count();
    let male_needed = characters.len() - female_needed;

    let partition = catalog.partition_by_gender(exclusions);

    CapacityReport {
        female_needed,
        female_available: partition.female.len(),
        male_needed,
        male_available: partition.male.len(),
    }
}

/// Fails with [`CastingError::Capacity`] when no unique assignment can exist.
pub fn check_capacity(
    characters: &[Character],
    catalog: &VoiceCatalog,
    exclusions: &ExclusionSet,
) -> Result<CapacityReport, CastingError> {
    let report = capacity_report(characters, catalog, exclusions);
    debug!("Capacity check: {:?}", report);

    if !report.is_satisfiable() {
        return Err(CastingError::Capacity {
            female_needed: report.female_needed,
            female_available: report.female_available,
            male_needed: report.male_needed,
            male_available: report.male_available,
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::VoiceGender;
    use crate::services::casting::tests::character;
    use crate::services::catalog::voice;

    fn catalog() -> VoiceCatalog {
        VoiceCatalog::new(vec![
            voice("N", "Nell", VoiceGender::Female),
            voice("F1", "Freya", VoiceGender::Female),
            voice("F2", "Fiona", VoiceGender::Female),
            voice("M1", "Marcus", VoiceGender::Male),
            voice("X1", "Sky", VoiceGender::Neutral),
        ])
        .unwrap()
    }

    #[test]
    fn test_narrator_is_not_counted() {
        let chars = vec![
            character("a", "Ann", Gender::Female),
            character("b", "Bea", Gender::Female),
            character("c", "Cat", Gender::Female),
        ];
        let err = check_capacity(&chars, &catalog(), &ExclusionSet::new("N")).unwrap_err();
        match err {
            CastingError::Capacity {
                female_needed,
                female_available,
                ..
            } => {
                assert_eq!(female_needed, 3);
                assert_eq!(female_available, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_gender_counts_against_male_pool() {
        let chars = vec![
            character("a", "Al", Gender::Male),
            character("b", "Stranger", Gender::Unknown),
        ];
        let report = capacity_report(&chars, &catalog(), &ExclusionSet::new("N"));
        assert_eq!(report.male_needed, 2);
        assert_eq!(report.male_available, 1);
        assert!(!report.is_satisfiable());
    }

    #[test]
    fn test_used_voices_are_excluded() {
        let chars = vec![character("a", "Ann", Gender::Female)];
        let exclusions = ExclusionSet::new("N").with_used(["F1", "F2"]);
        assert!(check_capacity(&chars, &catalog(), &exclusions).is_err());

        let exclusions = ExclusionSet::new("N").with_used(["F1"]);
        let report = check_capacity(&chars, &catalog(), &exclusions).unwrap();
        assert_eq!(report.female_available, 1);
    }

    #[test]
    fn test_empty_cast_always_fits() {
        let empty = VoiceCatalog::new(vec![]).unwrap();
        assert!(check_capacity(&[], &empty, &ExclusionSet::new("N")).is_ok());
    }
}
