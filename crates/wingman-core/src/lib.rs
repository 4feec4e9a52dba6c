use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::macros::format_description;
use time::Date;

mod milestones;

pub use milestones::{upcoming_milestones, Milestone, MilestoneKind, DEFAULT_MILESTONE_RANGE_DAYS};

/// Raw field values handed over by a collaborator. `None` and blank strings both mean
/// "no value"; on update they clear an optional field.
pub type FieldSet = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ValidationError {
    #[error("{kind}: required field `{field}` is missing or empty")]
    MissingRequired { kind: EntityKind, field: &'static str },
    #[error("{kind}: field `{field}` is not an ISO 8601 date: {value:?}")]
    InvalidDate { kind: EntityKind, field: &'static str, value: String },
    #[error("{kind}: unknown field `{field}`")]
    UnknownField { kind: EntityKind, field: String },
    #[error("{kind}: field `{field}` is assigned by the coordinator and cannot be supplied")]
    ReadOnlyField { kind: EntityKind, field: &'static str },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    DirectReport,
    ManagementTip,
}

impl EntityKind {
    pub const ALL: [Self; 2] = [Self::DirectReport, Self::ManagementTip];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectReport => "direct_report",
            Self::ManagementTip => "management_tip",
        }
    }

    /// Relational table (and default mirror file stem) holding this kind.
    #[must_use]
    pub fn table_name(self) -> &'static str {
        match self {
            Self::DirectReport => "direct_reports",
            Self::ManagementTip => "management_tips",
        }
    }

    #[must_use]
    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            Self::DirectReport => DIRECT_REPORT_FIELDS,
            Self::ManagementTip => MANAGEMENT_TIP_FIELDS,
        }
    }

    #[must_use]
    pub fn field(self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|spec| spec.name == name)
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl RecordId {
    pub const FIRST: Self = Self(1);
    const UNASSIGNED: Self = Self(0);

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FieldType {
    Integer,
    Text,
    Date,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldSpec {
    const fn required(name: &'static str, field_type: FieldType) -> Self {
        Self { name, field_type, required: true }
    }

    const fn optional(name: &'static str, field_type: FieldType) -> Self {
        Self { name, field_type, required: false }
    }
}

pub const DIRECT_REPORT_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("id", FieldType::Integer),
    FieldSpec::required("first_name", FieldType::Text),
    FieldSpec::required("last_name", FieldType::Text),
    FieldSpec::optional("street_address_1", FieldType::Text),
    FieldSpec::optional("street_address_2", FieldType::Text),
    FieldSpec::optional("city", FieldType::Text),
    FieldSpec::optional("state", FieldType::Text),
    FieldSpec::optional("zipcode", FieldType::Text),
    FieldSpec::optional("country", FieldType::Text),
    FieldSpec::optional("birthday", FieldType::Date),
    FieldSpec::optional("hire_date", FieldType::Date),
    FieldSpec::optional("current_role", FieldType::Text),
    FieldSpec::optional("role_start_date", FieldType::Date),
    FieldSpec::optional("partner_name", FieldType::Text),
];

/// Tips carry any further keys verbatim as metadata.
pub const MANAGEMENT_TIP_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("id", FieldType::Integer),
    FieldSpec::optional("date", FieldType::Date),
    FieldSpec::required("text", FieldType::Text),
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectReport {
    pub id: RecordId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, deserialize_with = "optional_text")]
    pub street_address_1: Option<String>,
    #[serde(default, deserialize_with = "optional_text")]
    pub street_address_2: Option<String>,
    #[serde(default, deserialize_with = "optional_text")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "optional_text")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "optional_text")]
    pub zipcode: Option<String>,
    #[serde(default, deserialize_with = "optional_text")]
    pub country: Option<String>,
    #[serde(default, with = "iso_date")]
    pub birthday: Option<Date>,
    #[serde(default, with = "iso_date")]
    pub hire_date: Option<Date>,
    #[serde(default, deserialize_with = "optional_text")]
    pub current_role: Option<String>,
    #[serde(default, with = "iso_date")]
    pub role_start_date: Option<Date>,
    #[serde(default, deserialize_with = "optional_text")]
    pub partner_name: Option<String>,
}

impl DirectReport {
    fn unassigned() -> Self {
        Self {
            id: RecordId::UNASSIGNED,
            first_name: String::new(),
            last_name: String::new(),
            street_address_1: None,
            street_address_2: None,
            city: None,
            state: None,
            zipcode: None,
            country: None,
            birthday: None,
            hire_date: None,
            current_role: None,
            role_start_date: None,
            partner_name: None,
        }
    }

    fn set_text(&mut self, name: &str, value: Option<String>) {
        match name {
            "first_name" => self.first_name = value.unwrap_or_default(),
            "last_name" => self.last_name = value.unwrap_or_default(),
            "street_address_1" => self.street_address_1 = value,
            "street_address_2" => self.street_address_2 = value,
            "city" => self.city = value,
            "state" => self.state = value,
            "zipcode" => self.zipcode = value,
            "country" => self.country = value,
            "current_role" => self.current_role = value,
            "partner_name" => self.partner_name = value,
            _ => {}
        }
    }

    fn set_date(&mut self, name: &str, value: Option<Date>) {
        match name {
            "birthday" => self.birthday = value,
            "hire_date" => self.hire_date = value,
            "role_start_date" => self.role_start_date = value,
            _ => {}
        }
    }

    /// Case-insensitive `first|last` key used to spot the same person twice.
    #[must_use]
    pub fn name_key(&self) -> String {
        format!(
            "{}|{}",
            self.first_name.trim().to_lowercase(),
            self.last_name.trim().to_lowercase()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagementTip {
    pub id: RecordId,
    #[serde(default, with = "iso_date")]
    pub date: Option<Date>,
    pub text: String,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

impl ManagementTip {
    fn unassigned() -> Self {
        Self { id: RecordId::UNASSIGNED, date: None, text: String::new(), metadata: BTreeMap::new() }
    }

    /// Lower-cased, whitespace-collapsed text; equal keys mean the same tip.
    #[must_use]
    pub fn text_key(&self) -> String {
        self.text.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
    }
}

/// One record of either kind. Serializes as the bare inner object.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Record {
    DirectReport(DirectReport),
    ManagementTip(ManagementTip),
}

impl Record {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::DirectReport(_) => EntityKind::DirectReport,
            Self::ManagementTip(_) => EntityKind::ManagementTip,
        }
    }

    #[must_use]
    pub fn id(&self) -> RecordId {
        match self {
            Self::DirectReport(report) => report.id,
            Self::ManagementTip(tip) => tip.id,
        }
    }

    fn set_id(&mut self, id: RecordId) {
        match self {
            Self::DirectReport(report) => report.id = id,
            Self::ManagementTip(tip) => tip.id = id,
        }
    }

    /// Check the fields every stored record must carry, for records that did not come
    /// through [`validate`] (for example, ones loaded from disk).
    ///
    /// # Errors
    /// Returns [`ValidationError::MissingRequired`] for the first blank required field.
    pub fn check_required(&self) -> Result<(), ValidationError> {
        match self {
            Self::DirectReport(report) => check_direct_report(report),
            Self::ManagementTip(tip) => check_management_tip(tip),
        }
    }

    /// Content key for duplicate detection: the person's name, or the tip's normalized text.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        match self {
            Self::DirectReport(report) => report.name_key(),
            Self::ManagementTip(tip) => tip.text_key(),
        }
    }

    #[must_use]
    pub fn as_direct_report(&self) -> Option<&DirectReport> {
        match self {
            Self::DirectReport(report) => Some(report),
            Self::ManagementTip(_) => None,
        }
    }

    #[must_use]
    pub fn as_management_tip(&self) -> Option<&ManagementTip> {
        match self {
            Self::ManagementTip(tip) => Some(tip),
            Self::DirectReport(_) => None,
        }
    }
}

/// A field set that passed validation but has not been given an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRecord(Record);

impl ValidatedRecord {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.0.kind()
    }

    #[must_use]
    pub fn dedup_key(&self) -> String {
        self.0.dedup_key()
    }

    #[must_use]
    pub fn into_record(self, id: RecordId) -> Record {
        let mut record = self.0;
        record.set_id(id);
        record
    }
}

/// Validate a proposed field set for a new record of `kind`.
///
/// # Errors
/// Returns [`ValidationError`] when a required field is missing or blank, a date field is
/// not ISO 8601, an unknown field is supplied to a direct report, or `id` is supplied.
pub fn validate(kind: EntityKind, fields: &FieldSet) -> Result<ValidatedRecord, ValidationError> {
    let record = match kind {
        EntityKind::DirectReport => {
            Record::DirectReport(apply_direct_report_fields(DirectReport::unassigned(), fields)?)
        }
        EntityKind::ManagementTip => {
            Record::ManagementTip(apply_management_tip_fields(ManagementTip::unassigned(), fields)?)
        }
    };
    Ok(ValidatedRecord(record))
}

/// Overlay `fields` on `existing` and validate the result. Fields absent from the set keep
/// their current values; blank values clear optional fields.
///
/// # Errors
/// Returns [`ValidationError`] under the same rules as [`validate`], including when a
/// required field would be cleared.
pub fn validate_update(existing: &Record, fields: &FieldSet) -> Result<Record, ValidationError> {
    match existing {
        Record::DirectReport(report) => {
            apply_direct_report_fields(report.clone(), fields).map(Record::DirectReport)
        }
        Record::ManagementTip(tip) => {
            apply_management_tip_fields(tip.clone(), fields).map(Record::ManagementTip)
        }
    }
}

enum FieldValue {
    Text(Option<String>),
    Date(Option<Date>),
}

fn typed_value(
    kind: EntityKind,
    spec: &FieldSpec,
    raw: Option<&str>,
) -> Result<FieldValue, ValidationError> {
    let value = normalize_text(raw);
    match spec.field_type {
        // The only integer field is the id, which the coordinator assigns.
        FieldType::Integer => Err(ValidationError::ReadOnlyField { kind, field: spec.name }),
        FieldType::Text => Ok(FieldValue::Text(value)),
        FieldType::Date => parse_date_field(kind, spec.name, value).map(FieldValue::Date),
    }
}

fn apply_direct_report_fields(
    mut report: DirectReport,
    fields: &FieldSet,
) -> Result<DirectReport, ValidationError> {
    const KIND: EntityKind = EntityKind::DirectReport;

    for (field, raw) in fields {
        let spec = KIND
            .field(field)
            .ok_or_else(|| ValidationError::UnknownField { kind: KIND, field: field.clone() })?;
        match typed_value(KIND, spec, raw.as_deref())? {
            FieldValue::Text(value) => report.set_text(spec.name, value),
            FieldValue::Date(value) => report.set_date(spec.name, value),
        }
    }

    check_direct_report(&report)?;
    Ok(report)
}

fn apply_management_tip_fields(
    mut tip: ManagementTip,
    fields: &FieldSet,
) -> Result<ManagementTip, ValidationError> {
    const KIND: EntityKind = EntityKind::ManagementTip;

    for (field, raw) in fields {
        let Some(spec) = KIND.field(field) else {
            match normalize_text(raw.as_deref()) {
                Some(value) => {
                    tip.metadata.insert(field.clone(), Value::String(value));
                }
                None => {
                    tip.metadata.remove(field);
                }
            }
            continue;
        };
        match typed_value(KIND, spec, raw.as_deref())? {
            FieldValue::Text(value) => tip.text = value.unwrap_or_default(),
            FieldValue::Date(value) => tip.date = value,
        }
    }

    check_management_tip(&tip)?;
    Ok(tip)
}

fn check_direct_report(report: &DirectReport) -> Result<(), ValidationError> {
    require_non_empty(EntityKind::DirectReport, "first_name", &report.first_name)?;
    require_non_empty(EntityKind::DirectReport, "last_name", &report.last_name)
}

fn check_management_tip(tip: &ManagementTip) -> Result<(), ValidationError> {
    require_non_empty(EntityKind::ManagementTip, "text", &tip.text)
}

fn normalize_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}

fn require_non_empty(
    kind: EntityKind,
    field: &'static str,
    value: &str,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingRequired { kind, field });
    }
    Ok(())
}

fn parse_date_field(
    kind: EntityKind,
    field: &'static str,
    value: Option<String>,
) -> Result<Option<Date>, ValidationError> {
    match value {
        None => Ok(None),
        Some(raw) => parse_iso_date(&raw)
            .map(Some)
            .ok_or(ValidationError::InvalidDate { kind, field, value: raw }),
    }
}

/// Parse an ISO 8601 calendar date in extended (`2022-03-15`) or basic (`20220315`) form.
#[must_use]
pub fn parse_iso_date(raw: &str) -> Option<Date> {
    let raw = raw.trim();
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .or_else(|_| Date::parse(raw, format_description!("[year][month][day]")))
        .ok()
}

/// Format a date as ISO 8601 extended form (`YYYY-MM-DD`).
#[must_use]
pub fn format_iso_date(date: Date) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
}

/// Build a [`FieldSet`] from string pairs.
#[must_use]
pub fn field_set<'a, I>(pairs: I) -> FieldSet
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs.into_iter().map(|(key, value)| (key.to_string(), Some(value.to_string()))).collect()
}

fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(normalize_text(value.as_deref()))
}

/// Serde adapter storing `Option<Date>` as an ISO 8601 string or `null`.
pub mod iso_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    /// # Errors
    /// Propagates serializer failures.
    pub fn serialize<S>(value: &Option<Date>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(date) => serializer.serialize_some(&super::format_iso_date(*date)),
            None => serializer.serialize_none(),
        }
    }

    /// # Errors
    /// Fails when a non-empty value is not an ISO 8601 date.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Date>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => super::parse_iso_date(value).map(Some).ok_or_else(|| {
                serde::de::Error::custom(format!("invalid ISO 8601 date: {value}"))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::Month;

    use super::*;

    fn date(year: i32, month: Month, day: u8) -> Date {
        match Date::from_calendar_date(year, month, day) {
            Ok(date) => date,
            Err(err) => panic!("invalid fixture date: {err}"),
        }
    }

    fn assert_validation_error(kind: EntityKind, fields: &FieldSet, expected: &ValidationError) {
        match validate(kind, fields) {
            Ok(record) => panic!("expected {expected}, got {record:?}"),
            Err(err) => assert_eq!(&err, expected),
        }
    }

    #[test]
    fn minimal_direct_report_leaves_optional_fields_absent() -> Result<(), ValidationError> {
        let validated = validate(
            EntityKind::DirectReport,
            &field_set([("first_name", "Ada"), ("last_name", "Lovelace")]),
        )?;
        let record = validated.into_record(RecordId::FIRST);

        let Record::DirectReport(report) = record else {
            panic!("expected a direct report");
        };
        assert_eq!(report.id, RecordId(1));
        assert_eq!(report.first_name, "Ada");
        assert_eq!(report.last_name, "Lovelace");
        assert_eq!(report.city, None);
        assert_eq!(report.birthday, None);
        assert_eq!(report.partner_name, None);
        Ok(())
    }

    #[test]
    fn blank_required_field_is_rejected() {
        assert_validation_error(
            EntityKind::DirectReport,
            &field_set([("first_name", "   "), ("last_name", "Lovelace")]),
            &ValidationError::MissingRequired {
                kind: EntityKind::DirectReport,
                field: "first_name",
            },
        );
        assert_validation_error(
            EntityKind::DirectReport,
            &field_set([("first_name", "Ada")]),
            &ValidationError::MissingRequired { kind: EntityKind::DirectReport, field: "last_name" },
        );
        assert_validation_error(
            EntityKind::ManagementTip,
            &field_set([("date", "2025-01-02")]),
            &ValidationError::MissingRequired { kind: EntityKind::ManagementTip, field: "text" },
        );
    }

    #[test]
    fn dates_accept_extended_and_basic_iso_forms() -> Result<(), ValidationError> {
        let validated = validate(
            EntityKind::DirectReport,
            &field_set([
                ("first_name", "Grace"),
                ("last_name", "Hopper"),
                ("birthday", "1906-12-09"),
                ("hire_date", "19430101"),
            ]),
        )?;
        let record = validated.into_record(RecordId(7));
        let report = record.as_direct_report().unwrap_or_else(|| unreachable!());

        assert_eq!(report.birthday, Some(date(1906, Month::December, 9)));
        assert_eq!(report.hire_date, Some(date(1943, Month::January, 1)));
        Ok(())
    }

    #[test]
    fn unparseable_date_is_rejected() {
        assert_validation_error(
            EntityKind::DirectReport,
            &field_set([("first_name", "Ada"), ("last_name", "Lovelace"), ("hire_date", "2022-13-40")]),
            &ValidationError::InvalidDate {
                kind: EntityKind::DirectReport,
                field: "hire_date",
                value: "2022-13-40".to_string(),
            },
        );
    }

    #[test]
    fn id_and_unknown_fields_are_rejected_for_direct_reports() {
        assert_validation_error(
            EntityKind::DirectReport,
            &field_set([("id", "4"), ("first_name", "Ada"), ("last_name", "Lovelace")]),
            &ValidationError::ReadOnlyField { kind: EntityKind::DirectReport, field: "id" },
        );
        assert_validation_error(
            EntityKind::DirectReport,
            &field_set([("first_name", "Ada"), ("last_name", "Lovelace"), ("nickname", "A")]),
            &ValidationError::UnknownField {
                kind: EntityKind::DirectReport,
                field: "nickname".to_string(),
            },
        );
    }

    #[test]
    fn tip_keeps_extra_fields_as_metadata() -> Result<(), ValidationError> {
        let validated = validate(
            EntityKind::ManagementTip,
            &field_set([("text", "Run a weekly 1:1."), ("source", "mistral")]),
        )?;
        let record = validated.into_record(RecordId(3));
        let tip = record.as_management_tip().unwrap_or_else(|| unreachable!());

        assert_eq!(tip.text, "Run a weekly 1:1.");
        assert_eq!(tip.metadata.get("source"), Some(&Value::String("mistral".to_string())));
        Ok(())
    }

    #[test]
    fn update_overlays_fields_and_clears_blank_optionals() -> Result<(), ValidationError> {
        let existing = validate(
            EntityKind::DirectReport,
            &field_set([("first_name", "Ada"), ("last_name", "Lovelace"), ("city", "London")]),
        )?
        .into_record(RecordId(2));

        let mut patch = field_set([("current_role", "Staff Engineer")]);
        patch.insert("city".to_string(), None);
        let updated = validate_update(&existing, &patch)?;
        let report = updated.as_direct_report().unwrap_or_else(|| unreachable!());

        assert_eq!(report.id, RecordId(2));
        assert_eq!(report.first_name, "Ada");
        assert_eq!(report.current_role.as_deref(), Some("Staff Engineer"));
        assert_eq!(report.city, None);
        Ok(())
    }

    #[test]
    fn update_cannot_clear_required_field() -> Result<(), ValidationError> {
        let existing = validate(
            EntityKind::DirectReport,
            &field_set([("first_name", "Ada"), ("last_name", "Lovelace")]),
        )?
        .into_record(RecordId(2));

        let result = validate_update(&existing, &field_set([("last_name", "")]));
        assert_eq!(
            result,
            Err(ValidationError::MissingRequired {
                kind: EntityKind::DirectReport,
                field: "last_name"
            })
        );
        Ok(())
    }

    #[test]
    fn direct_report_serializes_absent_fields_as_null() -> Result<(), serde_json::Error> {
        let record = validate(
            EntityKind::DirectReport,
            &field_set([("first_name", "Ada"), ("last_name", "Lovelace"), ("birthday", "1815-12-10")]),
        )
        .unwrap_or_else(|err| panic!("fixture should validate: {err}"))
        .into_record(RecordId(1));

        let json = serde_json::to_value(&record)?;
        assert_eq!(json["id"], Value::from(1));
        assert_eq!(json["birthday"], Value::String("1815-12-10".to_string()));
        assert_eq!(json["street_address_2"], Value::Null);
        assert_eq!(json["zipcode"], Value::Null);
        Ok(())
    }

    #[test]
    fn dedup_keys_ignore_case_and_spacing() -> Result<(), ValidationError> {
        let a = validate(
            EntityKind::ManagementTip,
            &field_set([("text", "Delegate  the outcome,\nnot the task.")]),
        )?;
        let b = validate(
            EntityKind::ManagementTip,
            &field_set([("text", "delegate the OUTCOME, not the task.")]),
        )?;
        assert_eq!(a.dedup_key(), b.dedup_key());

        let c = validate(
            EntityKind::DirectReport,
            &field_set([("first_name", " ada "), ("last_name", "LOVELACE")]),
        )?;
        assert_eq!(c.dedup_key(), "ada|lovelace");
        Ok(())
    }

    #[test]
    fn every_declared_field_is_stored_with_its_type() -> Result<(), serde_json::Error> {
        let mut fields = FieldSet::new();
        for spec in EntityKind::DirectReport.fields() {
            let value = match spec.field_type {
                FieldType::Integer => continue,
                FieldType::Text => format!("value of {}", spec.name),
                FieldType::Date => "2020-01-02".to_string(),
            };
            fields.insert(spec.name.to_string(), Some(value));
        }

        let record = validate(EntityKind::DirectReport, &fields)
            .unwrap_or_else(|err| panic!("every declared field should validate: {err}"))
            .into_record(RecordId(1));
        let json = serde_json::to_value(&record)?;

        for (name, value) in &fields {
            assert_eq!(json[name.as_str()].as_str(), value.as_deref(), "field {name}");
        }
        Ok(())
    }

    #[test]
    fn date_typed_tip_field_is_parsed() {
        assert_validation_error(
            EntityKind::ManagementTip,
            &field_set([("text", "Say thank you."), ("date", "yesterday")]),
            &ValidationError::InvalidDate {
                kind: EntityKind::ManagementTip,
                field: "date",
                value: "yesterday".to_string(),
            },
        );
        assert_validation_error(
            EntityKind::ManagementTip,
            &field_set([("text", "Say thank you."), ("id", "3")]),
            &ValidationError::ReadOnlyField { kind: EntityKind::ManagementTip, field: "id" },
        );
    }

    #[test]
    fn check_required_catches_blank_names_on_loaded_records() -> Result<(), ValidationError> {
        let Record::DirectReport(mut report) = validate(
            EntityKind::DirectReport,
            &field_set([("first_name", "Ada"), ("last_name", "Lovelace")]),
        )?
        .into_record(RecordId(1)) else {
            panic!("expected a direct report");
        };
        assert_eq!(Record::DirectReport(report.clone()).check_required(), Ok(()));

        report.first_name = "  ".to_string();
        assert_eq!(
            Record::DirectReport(report).check_required(),
            Err(ValidationError::MissingRequired {
                kind: EntityKind::DirectReport,
                field: "first_name"
            })
        );
        Ok(())
    }

    #[test]
    fn field_specs_mark_only_identity_and_names_required() {
        let required = EntityKind::DirectReport
            .fields()
            .iter()
            .filter(|spec| spec.required)
            .map(|spec| spec.name)
            .collect::<Vec<_>>();
        assert_eq!(required, vec!["id", "first_name", "last_name"]);
    }

    proptest! {
        #[test]
        fn property_zipcode_keeps_leading_zeros(zip in "0[0-9]{4}") {
            let validated = validate(
                EntityKind::DirectReport,
                &field_set([("first_name", "Ada"), ("last_name", "Lovelace"), ("zipcode", zip.as_str())]),
            );
            prop_assert!(validated.is_ok());
            let record = validated.unwrap_or_else(|_| unreachable!()).into_record(RecordId(1));
            let report = record.as_direct_report().unwrap_or_else(|| unreachable!());
            prop_assert_eq!(report.zipcode.as_deref(), Some(zip.as_str()));
        }
    }

    proptest! {
        #[test]
        fn property_well_formed_names_always_validate(
            first in "[A-Za-z][A-Za-z '-]{0,20}",
            last in "[A-Za-z][A-Za-z '-]{0,20}",
            year in 1950_i32..2010,
            ordinal in 1_u16..=365,
        ) {
            let birthday = Date::from_ordinal_date(year, ordinal).unwrap_or_else(|_| unreachable!());
            let birthday_text = format_iso_date(birthday);
            let validated = validate(
                EntityKind::DirectReport,
                &field_set([
                    ("first_name", first.as_str()),
                    ("last_name", last.as_str()),
                    ("birthday", birthday_text.as_str()),
                ]),
            );
            prop_assert!(validated.is_ok());
            let record = validated.unwrap_or_else(|_| unreachable!()).into_record(RecordId(9));
            let report = record.as_direct_report().unwrap_or_else(|| unreachable!());
            prop_assert_eq!(report.first_name.as_str(), first.trim());
            prop_assert_eq!(report.birthday, Some(birthday));
        }
    }
}
