//! Named-field roster record and its flat row serializer.
//!
//! Row layout: `[schema fields..., updated, validated, attachment...]`.
//! Every cell is kept as the raw stored string so a read followed by a write
//! reproduces untouched cells exactly.

use chrono::NaiveDate;

use super::schema::{AFFIRMATIVE, Field, NEGATIVE, SYSTEM_FIELDS};

const UPDATED_COLUMN: usize = Field::COUNT;
const VALIDATED_COLUMN: usize = Field::COUNT + 1;
const FIRST_ATTACHMENT_COLUMN: usize = Field::COUNT + SYSTEM_FIELDS;

/// Date format of the last-updated cell (day/month/year).
pub const UPDATED_FORMAT: &str = "%d/%m/%Y";

/// One character row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacterRecord {
    pub character: String,
    pub class: String,
    pub level: String,
    pub attack: String,
    pub defense: String,
    pub precision: String,
    pub ascended: String,
    pub growth: String,
    pub codex: String,
    /// Last-updated date, `dd/mm/yyyy`.
    pub updated: String,
    pub validated: String,
    /// Attachment references, in submission order.
    pub attachments: Vec<String>,
}

impl CharacterRecord {
    /// Build a record from a flat store row. Missing cells read as empty.
    pub fn from_row(cells: &[String]) -> Self {
        let cell = |i: usize| cells.get(i).cloned().unwrap_or_default();

        let mut attachments: Vec<String> = cells
            .get(FIRST_ATTACHMENT_COLUMN..)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        while attachments.last().is_some_and(|a| a.is_empty()) {
            attachments.pop();
        }

        Self {
            character: cell(Field::Character.index()),
            class: cell(Field::Class.index()),
            level: cell(Field::Level.index()),
            attack: cell(Field::Attack.index()),
            defense: cell(Field::Defense.index()),
            precision: cell(Field::Precision.index()),
            ascended: cell(Field::Ascended.index()),
            growth: cell(Field::Growth.index()),
            codex: cell(Field::Codex.index()),
            updated: cell(UPDATED_COLUMN),
            validated: cell(VALIDATED_COLUMN),
            attachments,
        }
    }

    /// Serialize to a flat row: schema, updated, validated, then attachments.
    pub fn to_row(&self) -> Vec<String> {
        let mut row: Vec<String> = Field::ALL.iter().map(|f| self.field(*f).to_string()).collect();
        row.push(self.updated.clone());
        row.push(self.validated.clone());
        row.extend(self.attachments.iter().cloned());
        row
    }

    /// Cells shown in the summary table (attachments excluded).
    pub fn display_cells(&self) -> Vec<String> {
        let mut cells = self.to_row();
        cells.truncate(FIRST_ATTACHMENT_COLUMN);
        cells
    }

    pub fn field(&self, field: Field) -> &str {
        match field {
            Field::Character => &self.character,
            Field::Class => &self.class,
            Field::Level => &self.level,
            Field::Attack => &self.attack,
            Field::Defense => &self.defense,
            Field::Precision => &self.precision,
            Field::Ascended => &self.ascended,
            Field::Growth => &self.growth,
            Field::Codex => &self.codex,
        }
    }

    pub fn set_field(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Character => &mut self.character,
            Field::Class => &mut self.class,
            Field::Level => &mut self.level,
            Field::Attack => &mut self.attack,
            Field::Defense => &mut self.defense,
            Field::Precision => &mut self.precision,
            Field::Ascended => &mut self.ascended,
            Field::Growth => &mut self.growth,
            Field::Codex => &mut self.codex,
        };
        *slot = value;
    }

    pub fn mark_validated(&mut self) {
        self.validated = AFFIRMATIVE.to_string();
    }

    /// Stamp a fresh submission: updated date set, validation cleared.
    pub fn stamp_submission(&mut self, today: NaiveDate) {
        self.updated = today.format(UPDATED_FORMAT).to_string();
        self.validated = NEGATIVE.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::schema::is_affirmative;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn full_row() -> Vec<String> {
        cells(&[
            "ARWEN", "MAGO", "40", "1200", "900", "85", "SI", "3", "12", "01/02/2024", "NO",
            "https://a", "https://b",
        ])
    }

    #[test]
    fn from_row_reads_named_fields() {
        let record = CharacterRecord::from_row(&full_row());
        assert_eq!(record.character, "ARWEN");
        assert_eq!(record.class, "MAGO");
        assert_eq!(record.codex, "12");
        assert_eq!(record.updated, "01/02/2024");
        assert_eq!(record.validated, "NO");
        assert_eq!(record.attachments, vec!["https://a", "https://b"]);
        assert!(is_affirmative(&record.ascended));
        assert!(!is_affirmative(&record.validated));
    }

    #[test]
    fn to_row_reproduces_stored_cells() {
        let row = full_row();
        assert_eq!(CharacterRecord::from_row(&row).to_row(), row);
    }

    #[test]
    fn short_row_pads_with_empty_cells() {
        let record = CharacterRecord::from_row(&cells(&["BORIN", "GUERRERO"]));
        assert_eq!(record.class, "GUERRERO");
        assert_eq!(record.level, "");
        assert_eq!(record.validated, "");
        assert!(record.attachments.is_empty());
        assert_eq!(record.to_row().len(), Field::COUNT + SYSTEM_FIELDS);
    }

    #[test]
    fn trailing_empty_attachment_cells_are_dropped() {
        let mut row = full_row();
        row[12] = String::new();
        let record = CharacterRecord::from_row(&row);
        assert_eq!(record.attachments, vec!["https://a"]);
    }

    #[test]
    fn row_width_tracks_attachment_count() {
        let mut record = CharacterRecord::default();
        assert_eq!(record.to_row().len(), 11);
        record.attachments.push("ref".into());
        assert_eq!(record.to_row().len(), 12);
    }

    #[test]
    fn display_cells_exclude_attachments() {
        let record = CharacterRecord::from_row(&full_row());
        let shown = record.display_cells();
        assert_eq!(shown.len(), Field::COUNT + SYSTEM_FIELDS);
        assert_eq!(shown.last().map(String::as_str), Some("NO"));
    }

    #[test]
    fn set_field_then_field_agree() {
        let mut record = CharacterRecord::default();
        for field in Field::ALL {
            record.set_field(field, format!("v{}", field.index()));
        }
        for field in Field::ALL {
            assert_eq!(record.field(field), format!("v{}", field.index()));
        }
    }

    #[test]
    fn stamp_submission_formats_day_month_year() {
        let mut record = CharacterRecord::default();
        record.validated = AFFIRMATIVE.into();
        let day = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        record.stamp_submission(day);
        assert_eq!(record.updated, "07/03/2024");
        assert_eq!(record.validated, NEGATIVE);
    }

    #[test]
    fn mark_validated_touches_only_validated() {
        let before = CharacterRecord::from_row(&full_row());
        let mut after = before.clone();
        after.mark_validated();
        assert!(is_affirmative(&after.validated));
        let (b, a) = (before.to_row(), after.to_row());
        for i in 0..b.len() {
            if i != VALIDATED_COLUMN {
                assert_eq!(a[i], b[i], "cell {i} changed");
            }
        }
    }
}
