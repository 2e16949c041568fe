// crates/db-relay-api/src/engine.rs
// ============================================================================
// Module: REST Query Engine
// Description: QueryEngine over the upstream REST API.
// Purpose: Reproduce direct-SQL select semantics for supported tables.
// Dependencies: db-relay-core, reqwest, serde, serde_json
// ============================================================================

//! ## Overview
//! [`ApiEngine`] validates every request against the schema registry exactly
//! like the direct backend, then fetches the richest upstream document for
//! the table and shapes it in memory (filter, projection, offset/limit).
//! Upstream keys are mapped onto registry column names case-insensitively so
//! both backends speak the same identifiers. `get_user_by_baid` renames the
//! keys it recognizes and keeps every other upstream field.
//!
//! Writes claim the commit through [`OperationControl::begin_commit`] right
//! before the upstream call, so a request that already timed out is never
//! sent.
//!
//! Endpoint mapping:
//! - `UserData` select: `GET /api/UserSettings/{Baid}`
//! - `SongBestData` select: `GET /api/PlayData/{Baid}` (`songBestData`)
//! - `SongPlayData` select: `GET /api/PlayHistory/{Baid}` (`songHistoryData`)
//! - `Card` select: `GET /api/Users/{Baid}` or the drained `GET /api/Users`
//! - `Card` insert: `POST /api/Cards/BindAccessCode`
//! - `Card` delete: `DELETE /api/Cards/{AccessCode}`
//!
//! `orderBy` and every other table or write fail with an explicit error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use db_relay_core::BackendMode;
use db_relay_core::EngineError;
use db_relay_core::NamedQueryRequest;
use db_relay_core::OperationControl;
use db_relay_core::QueryEngine;
use db_relay_core::QueryOutcome;
use db_relay_core::Row;
use db_relay_core::SchemaRegistry;
use db_relay_core::TableDeleteRequest;
use db_relay_core::TableInsertRequest;
use db_relay_core::TableSchema;
use db_relay_core::TableSelectRequest;
use db_relay_core::TableUpdateRequest;
use db_relay_core::engine::ensure_write;
use db_relay_core::rows::apply_filters;
use db_relay_core::rows::apply_projection;
use db_relay_core::rows::apply_window;
use db_relay_core::rows::canonicalize_keys;
use db_relay_core::rows::canonicalize_row;
use db_relay_core::validate::SelectPlan;
use db_relay_core::validate::plan_delete;
use db_relay_core::validate::plan_insert;
use db_relay_core::validate::plan_select;
use db_relay_core::validate::plan_update;
use db_relay_core::value::value_as_int;
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::client::ApiClient;
use crate::client::ApiEngineConfig;
use crate::client::ApiEngineError;

// ============================================================================
// SECTION: Upstream Shapes
// ============================================================================

/// One page of the user listing.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UserPage {
    /// Users on this page.
    users: Vec<UserCards>,
    /// Total page count reported upstream.
    total_pages: i64,
}

/// A user with its bound access codes.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UserCards {
    /// User identifier.
    baid: i64,
    /// Bound access codes.
    access_codes: Vec<String>,
}

/// Play data document.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlayData {
    /// Best scores per song and difficulty.
    song_best_data: Option<Vec<Map<String, Value>>>,
}

/// Play history document.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlayHistory {
    /// Individual plays.
    song_history_data: Option<Vec<Map<String, Value>>>,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// REST-backed query engine.
#[derive(Debug, Clone)]
pub struct ApiEngine {
    /// Engine configuration.
    config: ApiEngineConfig,
    /// Identifier allow-list.
    registry: SchemaRegistry,
    /// Upstream client.
    client: ApiClient,
}

impl ApiEngine {
    /// Builds the engine and its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`ApiEngineError::Invalid`] when the configuration is invalid.
    pub fn new(config: ApiEngineConfig, registry: SchemaRegistry) -> Result<Self, ApiEngineError> {
        let client = ApiClient::new(&config)?;
        Ok(Self {
            config,
            registry,
            client,
        })
    }

    /// Returns the registry entry for a table the plan already validated.
    fn schema(&self, name: &str) -> Result<&'static TableSchema, EngineError> {
        self.registry.table(name).ok_or_else(|| EngineError::Invalid(format!("unknown table: {name}")))
    }

    /// Fetches a single JSON document by path segments.
    fn get(&self, segments: &[&str]) -> Result<Value, EngineError> {
        let url = self.client.endpoint(segments, &[])?;
        Ok(self.client.get_json(url)?)
    }

    /// Decodes an upstream document into a typed shape; `null` is the default.
    fn decode<T: Default + DeserializeOwned>(value: Value) -> Result<T, EngineError> {
        if value.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(value)
            .map_err(|err| ApiEngineError::Decode(err.to_string()).into())
    }

    /// Returns the user document as zero or one rows.
    fn user_rows(&self, baid: i64) -> Result<Vec<Row>, EngineError> {
        match self.get(&["api", "Users", baid.to_string().as_str()])? {
            Value::Null => Ok(Vec::new()),
            Value::Object(user) => Ok(vec![user]),
            _ => Err(ApiEngineError::Decode("user is not an object".to_string()).into()),
        }
    }

    /// Returns the settings document as zero or one rows.
    fn user_settings_rows(&self, baid: i64) -> Result<Vec<Row>, EngineError> {
        match self.get(&["api", "UserSettings", baid.to_string().as_str()])? {
            Value::Null => Ok(Vec::new()),
            Value::Object(settings) => Ok(vec![settings]),
            _ => Err(ApiEngineError::Decode("user settings is not an object".to_string()).into()),
        }
    }

    /// Returns best-score rows for a user.
    fn song_best_rows(&self, baid: i64) -> Result<Vec<Row>, EngineError> {
        let payload: PlayData = Self::decode(self.get(&["api", "PlayData", baid.to_string().as_str()])?)?;
        Ok(payload.song_best_data.unwrap_or_default())
    }

    /// Returns play-history rows for a user.
    fn play_history_rows(&self, baid: i64) -> Result<Vec<Row>, EngineError> {
        let payload: PlayHistory =
            Self::decode(self.get(&["api", "PlayHistory", baid.to_string().as_str()])?)?;
        Ok(payload.song_history_data.unwrap_or_default())
    }

    /// Returns card rows for one user.
    fn cards_by_baid(&self, baid: i64) -> Result<Vec<Row>, EngineError> {
        let user: UserCards = Self::decode(self.get(&["api", "Users", baid.to_string().as_str()])?)?;
        Ok(user.access_codes.into_iter().map(|code| card_row(code, baid)).collect())
    }

    /// Drains the paginated user listing into card rows sorted by user then code.
    fn list_cards(&self) -> Result<Vec<Row>, EngineError> {
        let mut cards: Vec<(i64, String)> = Vec::new();
        let mut page: u32 = 1;
        loop {
            let url = self.client.endpoint(
                &["api", "Users"],
                &[("page", page.to_string()), ("limit", self.config.page_size.to_string())],
            )?;
            let payload: UserPage = Self::decode(self.client.get_json(url)?)?;
            for user in payload.users {
                cards.extend(user.access_codes.into_iter().map(|code| (user.baid, code)));
            }
            if payload.total_pages <= 0 || i64::from(page) >= payload.total_pages {
                break;
            }
            if page >= self.config.max_pages {
                return Err(EngineError::Backend(format!(
                    "api listing exceeds {} pages",
                    self.config.max_pages
                )));
            }
            page += 1;
        }
        cards.sort();
        Ok(cards.into_iter().map(|(baid, code)| card_row(code, baid)).collect())
    }

    /// Fetches the unshaped rows backing a select.
    fn table_rows(&self, plan: &SelectPlan) -> Result<Vec<Row>, EngineError> {
        let table = plan.table.name;
        match table {
            "UserData" => self.user_settings_rows(required_baid(plan, table)?),
            "SongBestData" => self.song_best_rows(required_baid(plan, table)?),
            "SongPlayData" => self.play_history_rows(required_baid(plan, table)?),
            "Card" => match plan.filter("Baid").and_then(value_as_int) {
                Some(baid) => self.cards_by_baid(baid),
                None => self.list_cards(),
            },
            _ => Err(EngineError::Unsupported(format!(
                "table.select not supported in api mode for table: {table}"
            ))),
        }
    }
}

impl QueryEngine for ApiEngine {
    fn mode(&self) -> BackendMode {
        BackendMode::Api
    }

    fn allow_write(&self) -> bool {
        self.config.allow_write
    }

    fn query_named(
        &self,
        request: &NamedQueryRequest,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError> {
        control.check()?;
        let query =
            self.registry.query(&request.name).ok_or_else(|| EngineError::unknown_query(&request.name))?;
        if !query.read_only {
            ensure_write(self.config.allow_write)?;
        }
        let rows = match query.name {
            "get_user_by_baid" => {
                let schema = self.schema("UserData")?;
                let baid = int_arg(&request.args, 0, "baid")?;
                self.user_rows(baid)?.into_iter().map(|row| canonicalize_keys(schema, row)).collect()
            }
            "list_cards" => self.list_cards()?,
            "list_song_best_by_baid" => {
                let baid = int_arg(&request.args, 0, "baid")?;
                let limit = request.args.get(1).and_then(value_as_int);
                let schema = self.schema("SongBestData")?;
                let rows = self
                    .song_best_rows(baid)?
                    .into_iter()
                    .map(|row| canonicalize_row(schema, row))
                    .collect();
                apply_window(rows, None, limit)
            }
            name => {
                return Err(EngineError::Unsupported(format!(
                    "query not supported in api mode: {name}"
                )));
            }
        };
        Ok(QueryOutcome::Rows {
            rows,
        })
    }

    fn table_select(
        &self,
        request: &TableSelectRequest,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError> {
        control.check()?;
        let plan = plan_select(&self.registry, request)?;
        if !plan.order_by.is_empty() {
            return Err(EngineError::Unsupported("orderBy is not supported in api mode".to_string()));
        }
        let rows: Vec<Row> = self
            .table_rows(&plan)?
            .into_iter()
            .map(|row| canonicalize_row(plan.table, row))
            .collect();
        let rows = apply_filters(rows, &plan.filters);
        let rows = apply_projection(rows, &plan.columns);
        Ok(QueryOutcome::Rows {
            rows: apply_window(rows, plan.offset, plan.limit),
        })
    }

    fn table_insert(
        &self,
        request: &TableInsertRequest,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError> {
        ensure_write(self.config.allow_write)?;
        let plan = plan_insert(&self.registry, request)?;
        if plan.table.name != "Card" {
            return Err(EngineError::Unsupported(format!(
                "table.insert not supported in api mode for table: {}",
                plan.table.name
            )));
        }
        let baid = plan
            .value("Baid")
            .and_then(value_as_int)
            .ok_or_else(|| EngineError::Invalid("Card insert requires Baid".to_string()))?;
        let access_code = plan
            .value("AccessCode")
            .and_then(access_code_text)
            .ok_or_else(|| EngineError::Invalid("Card insert requires AccessCode".to_string()))?;
        let url = self.client.endpoint(&["api", "Cards", "BindAccessCode"], &[])?;
        let body = json!({"baid": baid, "accessCode": access_code});
        control.begin_commit()?;
        self.client.send(Method::POST, url, Some(&body))?;
        Ok(QueryOutcome::Mutation {
            rows_affected: 1,
            last_insert_id: None,
        })
    }

    fn table_update(
        &self,
        request: &TableUpdateRequest,
        _control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError> {
        ensure_write(self.config.allow_write)?;
        let plan = plan_update(&self.registry, request)?;
        Err(EngineError::Unsupported(format!(
            "table.update not supported in api mode for table: {}",
            plan.table.name
        )))
    }

    fn table_delete(
        &self,
        request: &TableDeleteRequest,
        control: &OperationControl,
    ) -> Result<QueryOutcome, EngineError> {
        ensure_write(self.config.allow_write)?;
        let plan = plan_delete(&self.registry, request)?;
        if plan.table.name != "Card" {
            return Err(EngineError::Unsupported(format!(
                "table.delete not supported in api mode for table: {}",
                plan.table.name
            )));
        }
        let access_code = plan
            .filter("AccessCode")
            .and_then(access_code_text)
            .ok_or_else(|| EngineError::Invalid("Card delete requires AccessCode filter".to_string()))?;
        let url = self.client.endpoint(&["api", "Cards", access_code.as_str()], &[])?;
        control.begin_commit()?;
        self.client.send(Method::DELETE, url, None)?;
        Ok(QueryOutcome::Mutation {
            rows_affected: 1,
            last_insert_id: None,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a card row in registry column spelling.
fn card_row(access_code: String, baid: i64) -> Row {
    let mut row = Row::new();
    row.insert("AccessCode".to_string(), Value::String(access_code));
    row.insert("Baid".to_string(), Value::from(baid));
    row
}

/// Reads a positional integer argument.
fn int_arg(args: &[Value], index: usize, name: &str) -> Result<i64, EngineError> {
    let value = args.get(index).ok_or_else(|| EngineError::Invalid(format!("missing arg: {name}")))?;
    value_as_int(value).ok_or_else(|| EngineError::Invalid(format!("invalid int: {value}")))
}

/// Reads the `Baid` filter that scopes a per-user document.
fn required_baid(plan: &SelectPlan, table: &str) -> Result<i64, EngineError> {
    plan.filter("Baid").and_then(value_as_int).ok_or_else(|| {
        EngineError::Unsupported(format!("{table} table.select requires Baid filter in api mode"))
    })
}

/// Renders an access code value; blanks and non-scalars are rejected.
fn access_code_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
