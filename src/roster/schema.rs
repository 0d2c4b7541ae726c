//! Roster schema: the ordered questions that define a row.

/// Cells that follow the schema answers: last-updated date and validated flag.
pub const SYSTEM_FIELDS: usize = 2;

/// Number of attachment slots requested per update.
pub const MAX_ATTACHMENTS: usize = 2;

/// Full fixed row width used for in-place overwrites.
pub const ROW_WIDTH: usize = Field::COUNT + SYSTEM_FIELDS + MAX_ATTACHMENTS;

/// Stored value for an affirmative flag.
pub const AFFIRMATIVE: &str = "SI";

/// Stored value for a negative flag.
pub const NEGATIVE: &str = "NO";

/// Header of the last-updated column.
pub const UPDATED_HEADER: &str = "ACTUALIZADO";

/// Header of the validated column.
pub const VALIDATED_HEADER: &str = "VALIDADO";

/// One schema question, in row order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Character,
    Class,
    Level,
    Attack,
    Defense,
    Precision,
    Ascended,
    Growth,
    Codex,
}

impl Field {
    pub const COUNT: usize = 9;

    /// Every field in column order. The identity question comes first.
    pub const ALL: [Field; Field::COUNT] = [
        Field::Character,
        Field::Class,
        Field::Level,
        Field::Attack,
        Field::Defense,
        Field::Precision,
        Field::Ascended,
        Field::Growth,
        Field::Codex,
    ];

    /// The field holding the identity key.
    pub const IDENTITY: Field = Field::Character;

    /// Zero-based column of this field.
    pub fn index(self) -> usize {
        match self {
            Self::Character => 0,
            Self::Class => 1,
            Self::Level => 2,
            Self::Attack => 3,
            Self::Defense => 4,
            Self::Precision => 5,
            Self::Ascended => 6,
            Self::Growth => 7,
            Self::Codex => 8,
        }
    }

    /// Question text posted to the channel, also used as the column header.
    pub fn prompt(self) -> &'static str {
        match self {
            Self::Character => "PERSONAJE",
            Self::Class => "CLASE",
            Self::Level => "NIVEL",
            Self::Attack => "ATK",
            Self::Defense => "DEF",
            Self::Precision => "PREC",
            Self::Ascended => "ASCENDIDO SI/NO",
            Self::Growth => "CRECIMIENTO",
            Self::Codex => "CODICE",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Character => "character",
            Self::Class => "class",
            Self::Level => "level",
            Self::Attack => "attack",
            Self::Defense => "defense",
            Self::Precision => "precision",
            Self::Ascended => "ascended",
            Self::Growth => "growth",
            Self::Codex => "codex",
        };
        write!(f, "{s}")
    }
}

/// Canonical form for identity keys and free-text answers: uppercased, with
/// every run of whitespace (line breaks included) collapsed to one space.
pub fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Whether a stored flag cell reads as affirmative.
pub fn is_affirmative(value: &str) -> bool {
    normalize(value) == AFFIRMATIVE
}

/// Header row written to a fresh store.
pub fn default_headers() -> Vec<String> {
    let mut headers: Vec<String> = Field::ALL.iter().map(|f| f.prompt().to_string()).collect();
    headers.push(UPDATED_HEADER.to_string());
    headers.push(VALIDATED_HEADER.to_string());
    for slot in 1..=MAX_ATTACHMENTS {
        headers.push(format!("FOTO {slot}"));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_position_in_all() {
        for (i, field) in Field::ALL.iter().enumerate() {
            assert_eq!(field.index(), i, "{field} out of place");
        }
    }

    #[test]
    fn identity_is_first_question() {
        assert_eq!(Field::IDENTITY.index(), 0);
    }

    #[test]
    fn row_width_covers_schema_system_and_attachments() {
        assert_eq!(ROW_WIDTH, 13);
        assert_eq!(default_headers().len(), ROW_WIDTH);
    }

    #[test]
    fn normalize_trims_and_uppercases() {
        assert_eq!(normalize("  Gandalf el gris "), "GANDALF EL GRIS");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn normalize_collapses_line_breaks() {
        assert_eq!(normalize("mago\r\n  oscuro\t"), "MAGO OSCURO");
    }

    #[test]
    fn affirmative_is_case_and_space_insensitive() {
        assert!(is_affirmative("SI"));
        assert!(is_affirmative(" si "));
        assert!(!is_affirmative("NO"));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("SIP"));
    }
}
