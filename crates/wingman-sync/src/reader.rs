use std::collections::BTreeMap;

use serde::Serialize;
use wingman_core::{EntityKind, Record, RecordId};

/// Both stores' contents for one kind, side by side and never merged.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DualListing {
    pub kind: EntityKind,
    pub file_mirror: Vec<Record>,
    pub relational: Vec<Record>,
}

impl DualListing {
    #[must_use]
    pub fn divergence(&self) -> Divergence {
        Divergence::between(&self.file_mirror, &self.relational)
    }
}

/// Ids on which the file mirror and the relational store disagree.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Divergence {
    pub only_in_file_mirror: Vec<RecordId>,
    pub only_in_relational: Vec<RecordId>,
    pub mismatched: Vec<RecordId>,
    /// Ids the file mirror holds more than once. The relational key rules this out there.
    pub duplicated_in_file_mirror: Vec<RecordId>,
}

impl Divergence {
    #[must_use]
    pub fn between(file_mirror: &[Record], relational: &[Record]) -> Self {
        let relational_by_id =
            relational.iter().map(|record| (record.id(), record)).collect::<BTreeMap<_, _>>();
        let mut file_by_id = BTreeMap::new();
        let mut divergence = Self::default();
        for record in file_mirror {
            if file_by_id.insert(record.id(), record).is_some()
                && !divergence.duplicated_in_file_mirror.contains(&record.id())
            {
                divergence.duplicated_in_file_mirror.push(record.id());
            }
        }
        divergence.duplicated_in_file_mirror.sort_unstable();

        for (id, file_record) in &file_by_id {
            match relational_by_id.get(id) {
                None => divergence.only_in_file_mirror.push(*id),
                Some(db_record) if db_record != file_record => divergence.mismatched.push(*id),
                Some(_) => {}
            }
        }
        divergence.only_in_relational = relational_by_id
            .keys()
            .filter(|id| !file_by_id.contains_key(id))
            .copied()
            .collect();
        divergence
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.only_in_file_mirror.is_empty()
            && self.only_in_relational.is_empty()
            && self.mismatched.is_empty()
            && self.duplicated_in_file_mirror.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use wingman_core::{field_set, validate};

    use super::*;

    fn report(id: i64, first: &str) -> Result<Record> {
        Ok(validate(EntityKind::DirectReport, &field_set([("first_name", first), ("last_name", "Doe")]))?
            .into_record(RecordId(id)))
    }

    #[test]
    fn identical_sides_do_not_diverge() -> Result<()> {
        let records = vec![report(1, "Ada")?, report(2, "Grace")?];
        let listing = DualListing {
            kind: EntityKind::DirectReport,
            file_mirror: records.clone(),
            relational: records,
        };
        assert!(listing.divergence().is_empty());
        Ok(())
    }

    #[test]
    fn order_alone_is_not_divergence() -> Result<()> {
        let file = vec![report(2, "Grace")?, report(1, "Ada")?];
        let db = vec![report(1, "Ada")?, report(2, "Grace")?];
        assert!(Divergence::between(&file, &db).is_empty());
        Ok(())
    }

    #[test]
    fn reports_missing_and_mismatched_ids() -> Result<()> {
        let file = vec![report(1, "Ada")?, report(2, "Grace")?, report(4, "Alan")?];
        let db = vec![report(2, "Grace M.")?, report(3, "Edsger")?, report(4, "Alan")?];

        let divergence = Divergence::between(&file, &db);

        assert_eq!(divergence.only_in_file_mirror, vec![RecordId(1)]);
        assert_eq!(divergence.only_in_relational, vec![RecordId(3)]);
        assert_eq!(divergence.mismatched, vec![RecordId(2)]);
        assert!(divergence.duplicated_in_file_mirror.is_empty());
        assert!(!divergence.is_empty());
        Ok(())
    }

    #[test]
    fn repeated_file_ids_are_divergence() -> Result<()> {
        let db = vec![report(1, "Ada")?, report(2, "Grace")?];
        let file = vec![report(2, "Grace")?, report(1, "Ada")?, report(2, "Grace")?, report(2, "Grace")?];

        let divergence = Divergence::between(&file, &db);

        assert_eq!(divergence.duplicated_in_file_mirror, vec![RecordId(2)]);
        assert!(divergence.only_in_file_mirror.is_empty());
        assert!(divergence.only_in_relational.is_empty());
        assert!(divergence.mismatched.is_empty());
        assert!(!divergence.is_empty());
        Ok(())
    }
}
