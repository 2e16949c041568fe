// crates/db-relay-core/src/schema.rs
// ============================================================================
// Module: Schema Registry
// Description: Static allow-list of tables, columns, and named queries.
// Purpose: Single source of truth for identifiers a request may reference.
// Dependencies: none
// ============================================================================

//! ## Overview
//! The registry is immutable lookup data compiled into the binary. Every
//! identifier a controller request names must resolve through it before a
//! backend sees the request. Lookups hand back the registry's own `'static`
//! strings, so validated plans never carry caller-supplied identifier text.

// ============================================================================
// SECTION: Types
// ============================================================================

/// One allow-listed table and its ordered column list.
///
/// # Invariants
/// - Column order is the canonical `SELECT *` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name as stored.
    pub name: &'static str,
    /// Allowed columns in canonical order.
    pub columns: &'static [&'static str],
}

impl TableSchema {
    /// Returns the registry spelling of `column` when it is allowed.
    #[must_use]
    pub fn column(&self, column: &str) -> Option<&'static str> {
        self.columns.iter().copied().find(|candidate| *candidate == column)
    }

    /// Returns the registry spelling of `key` compared case-insensitively.
    #[must_use]
    pub fn column_ignore_case(&self, key: &str) -> Option<&'static str> {
        self.columns.iter().copied().find(|candidate| candidate.eq_ignore_ascii_case(key))
    }
}

/// A pre-approved parameterized query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedQuery {
    /// Query name used on the wire.
    pub name: &'static str,
    /// SQL template with positional `?` placeholders.
    pub sql: &'static str,
    /// False when the query mutates data and is gated by the write flag.
    pub read_only: bool,
}

/// Immutable table and query allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaRegistry {
    /// Allow-listed tables.
    tables: &'static [TableSchema],
    /// Allow-listed named queries.
    queries: &'static [NamedQuery],
}

impl SchemaRegistry {
    /// Builds a registry over caller-provided static data.
    #[must_use]
    pub const fn new(tables: &'static [TableSchema], queries: &'static [NamedQuery]) -> Self {
        Self {
            tables,
            queries,
        }
    }

    /// Returns the registry compiled into the agent.
    #[must_use]
    pub const fn builtin() -> Self {
        Self::new(BUILTIN_TABLES, BUILTIN_QUERIES)
    }

    /// Looks up a table by exact name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&'static TableSchema> {
        self.tables.iter().find(|table| table.name == name)
    }

    /// Looks up a named query by exact name.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&'static NamedQuery> {
        self.queries.iter().find(|query| query.name == name)
    }

    /// Returns every allow-listed table.
    #[must_use]
    pub const fn tables(&self) -> &'static [TableSchema] {
        self.tables
    }

    /// Returns every allow-listed named query.
    #[must_use]
    pub const fn queries(&self) -> &'static [NamedQuery] {
        self.queries
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ============================================================================
// SECTION: Builtin Data
// ============================================================================

/// Named queries shipped with the agent.
const BUILTIN_QUERIES: &[NamedQuery] = &[
    NamedQuery {
        name: "get_user_by_baid",
        sql: "SELECT * FROM UserData WHERE Baid = ? LIMIT 1",
        read_only: true,
    },
    NamedQuery {
        name: "list_cards",
        sql: "SELECT AccessCode, Baid FROM Card ORDER BY Baid",
        read_only: true,
    },
    NamedQuery {
        name: "list_song_best_by_baid",
        sql: "SELECT * FROM SongBestData WHERE Baid = ? LIMIT ?",
        read_only: true,
    },
    NamedQuery {
        name: "update_user_name",
        sql: "UPDATE UserData SET MyDonName = ? WHERE Baid = ?",
        read_only: false,
    },
];

/// Tables shipped with the agent.
const BUILTIN_TABLES: &[TableSchema] = &[
    TableSchema {
        name: "UserData",
        columns: &[
            "Baid",
            "AchievementDisplayDifficulty",
            "AiWinCount",
            "ColorBody",
            "ColorFace",
            "ColorLimb",
            "CostumeData",
            "CostumeFlgArray",
            "DifficultyPlayedArray",
            "DifficultySettingArray",
            "DisplayAchievement",
            "DisplayDan",
            "FavoriteSongsArray",
            "GenericInfoFlgArray",
            "IsAdmin",
            "IsSkipOn",
            "IsVoiceOn",
            "LastPlayDatetime",
            "LastPlayMode",
            "MyDonName",
            "MyDonNameLanguage",
            "NotesPosition",
            "OptionSetting",
            "SelectedToneId",
            "Title",
            "TitleFlgArray",
            "TitlePlateId",
            "ToneFlgArray",
            "UnlockedSongIdList",
            "UnlockedBody",
            "UnlockedFace",
            "UnlockedHead",
            "UnlockedKigurumi",
            "UnlockedPuchi",
            "CurrentBody",
            "CurrentFace",
            "CurrentHead",
            "CurrentKigurumi",
            "CurrentPuchi",
            "DifficultyPlayedCourse",
            "DifficultyPlayedSort",
            "DifficultyPlayedStar",
            "DifficultySettingCourse",
            "DifficultySettingSort",
            "DifficultySettingStar",
            "UnlockedUraSongIdList",
        ],
    },
    TableSchema {
        name: "Credential",
        columns: &["Baid", "Password", "Salt"],
    },
    TableSchema {
        name: "Card",
        columns: &["AccessCode", "Baid"],
    },
    TableSchema {
        name: "Tokens",
        columns: &["Baid", "Id", "Count"],
    },
    TableSchema {
        name: "SongPlayData",
        columns: &[
            "Id",
            "Baid",
            "ComboCount",
            "Crown",
            "Difficulty",
            "DrumrollCount",
            "GoodCount",
            "HitCount",
            "MissCount",
            "OkCount",
            "PlayTime",
            "Score",
            "ScoreRank",
            "ScoreRate",
            "Skipped",
            "SongId",
            "SongNumber",
        ],
    },
    TableSchema {
        name: "SongBestData",
        columns: &[
            "Baid",
            "SongId",
            "Difficulty",
            "BestCrown",
            "BestRate",
            "BestScore",
            "BestScoreRank",
        ],
    },
    TableSchema {
        name: "AiScoreData",
        columns: &["Baid", "SongId", "Difficulty", "IsWin"],
    },
    TableSchema {
        name: "AiSectionScoreData",
        columns: &[
            "Baid",
            "SongId",
            "Difficulty",
            "SectionIndex",
            "Crown",
            "IsWin",
            "Score",
            "GoodCount",
            "OkCount",
            "MissCount",
            "DrumrollCount",
        ],
    },
    TableSchema {
        name: "DanScoreData",
        columns: &[
            "Baid",
            "DanId",
            "DanType",
            "ArrivalSongCount",
            "ClearState",
            "ComboCountTotal",
            "SoulGaugeTotal",
        ],
    },
    TableSchema {
        name: "DanStageScoreData",
        columns: &[
            "Baid",
            "DanId",
            "DanType",
            "SongNumber",
            "BadCount",
            "ComboCount",
            "DrumrollCount",
            "GoodCount",
            "HighScore",
            "OkCount",
            "PlayScore",
            "TotalHitCount",
        ],
    },
    TableSchema {
        name: "sqlite_sequence",
        columns: &["name", "seq"],
    },
    TableSchema {
        name: "__EFMigrationsHistory",
        columns: &["MigrationId", "ProductVersion"],
    },
];

// ============================================================================
// SECTION: Tests
// ============================================================================
