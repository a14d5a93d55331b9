//! SQLite-backed storage for the harvesting engine.

use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::{HarvestError, Result};
use crate::models::{
    CarryforwardBalance, HarvestHistoryRecord, Holding, Portfolio, Quote, UserTaxPreferences,
    WashSaleRecord,
};
use crate::oracle::PriceOracle;
use crate::store::{CarryforwardDelta, HarvestCommit, HarvestStore, WashSaleInput};

#[derive(Clone)]
pub struct HarvestDb {
    pool: SqlitePool,
}

impl HarvestDb {
    /// Open (creating if missing) and initialize the schema.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;

        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        let schema = include_str!("../../../schema.sql");

        // sqlx executes one statement at a time.
        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Oracle reading the collaborator-fed `quotes` table.
#[derive(Clone)]
pub struct QuoteTableOracle {
    db: HarvestDb,
}

impl QuoteTableOracle {
    pub fn new(db: HarvestDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PriceOracle for QuoteTableOracle {
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>> {
        let quote = sqlx::query_as::<_, Quote>(
            "SELECT symbol, price, sector, change_percent FROM quotes WHERE symbol = ?",
        )
        .bind(symbol.to_uppercase())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(quote)
    }
}

#[derive(Clone)]
pub struct SqliteHarvestStore {
    db: HarvestDb,
}

impl SqliteHarvestStore {
    pub fn new(db: HarvestDb) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &HarvestDb {
        &self.db
    }

    // Seeding helpers used by bootstrap code and tests. Day-to-day mutation
    // of holdings goes through `commit_harvest` only.

    pub async fn create_portfolio(&self, user_id: i64, name: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO portfolios (user_id, name) VALUES (?, ?)")
            .bind(user_id)
            .bind(name)
            .execute(self.db.pool())
            .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn upsert_holding(&self, holding: &Holding) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO holdings (portfolio_id, symbol, shares, avg_cost_basis, sector)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(portfolio_id, symbol) DO UPDATE SET
                shares = excluded.shares,
                avg_cost_basis = excluded.avg_cost_basis,
                sector = excluded.sector
            "#,
        )
        .bind(holding.portfolio_id)
        .bind(&holding.symbol)
        .bind(holding.shares)
        .bind(holding.avg_cost_basis)
        .bind(&holding.sector)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    pub async fn add_lot(
        &self,
        portfolio_id: i64,
        symbol: &str,
        purchase_date: NaiveDate,
        shares: f64,
        cost_per_share: f64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO tax_lots (portfolio_id, symbol, purchase_date, shares, cost_per_share)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(portfolio_id)
        .bind(symbol)
        .bind(purchase_date)
        .bind(shares)
        .bind(cost_per_share)
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn log_transaction(
        &self,
        portfolio_id: i64,
        symbol: &str,
        action: &str,
        shares: f64,
        price: f64,
        trade_date: NaiveDate,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (portfolio_id, symbol, action, shares, price, trade_date)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(portfolio_id)
        .bind(symbol)
        .bind(action)
        .bind(shares)
        .bind(price)
        .bind(trade_date)
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn upsert_quote(&self, quote: &Quote) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quotes (symbol, price, sector, change_percent, updated_at)
            VALUES (?, ?, ?, ?, datetime('now'))
            ON CONFLICT(symbol) DO UPDATE SET
                price = excluded.price,
                sector = excluded.sector,
                change_percent = excluded.change_percent,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(quote.symbol.to_uppercase())
        .bind(quote.price)
        .bind(&quote.sector)
        .bind(quote.change_percent)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }
}

/// Additive upsert of a per-year carryforward row inside a transaction.
async fn upsert_carryforward_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: i64,
    tax_year: i32,
    delta: &CarryforwardDelta,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO carryforward_balances
            (user_id, tax_year, short_term_loss, long_term_loss,
             used_against_gains, used_against_income, remaining_balance)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, tax_year) DO UPDATE SET
            short_term_loss = carryforward_balances.short_term_loss + excluded.short_term_loss,
            long_term_loss = carryforward_balances.long_term_loss + excluded.long_term_loss,
            used_against_gains = carryforward_balances.used_against_gains + excluded.used_against_gains,
            used_against_income = carryforward_balances.used_against_income + excluded.used_against_income,
            remaining_balance = carryforward_balances.remaining_balance + excluded.remaining_balance
        "#,
    )
    .bind(user_id)
    .bind(tax_year)
    .bind(delta.short_term_loss)
    .bind(delta.long_term_loss)
    .bind(delta.used_against_gains)
    .bind(delta.used_against_income)
    .bind(delta.net())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_wash_sale_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    input: &WashSaleInput,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO wash_sale_windows
            (user_id, portfolio_id, symbol, sale_date, shares_sold, sale_price,
             cost_basis, realized_loss, window_start, window_end, status, replacement_symbol)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)
        "#,
    )
    .bind(input.user_id)
    .bind(input.portfolio_id)
    .bind(&input.symbol)
    .bind(input.sale_date)
    .bind(input.shares_sold)
    .bind(input.sale_price)
    .bind(input.cost_basis)
    .bind(input.realized_loss)
    .bind(input.window_start)
    .bind(input.window_end)
    .bind(&input.replacement_symbol)
    .execute(&mut **tx)
    .await?;

    Ok(result.last_insert_rowid())
}

#[async_trait]
impl HarvestStore for SqliteHarvestStore {
    async fn get_portfolio(&self, portfolio_id: i64) -> Result<Option<Portfolio>> {
        let portfolio = sqlx::query_as::<_, Portfolio>("SELECT * FROM portfolios WHERE id = ?")
            .bind(portfolio_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(portfolio)
    }

    async fn list_holdings(&self, portfolio_id: i64) -> Result<Vec<Holding>> {
        let holdings = sqlx::query_as::<_, Holding>(
            "SELECT * FROM holdings WHERE portfolio_id = ? ORDER BY symbol",
        )
        .bind(portfolio_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(holdings)
    }

    async fn get_holding(&self, portfolio_id: i64, symbol: &str) -> Result<Option<Holding>> {
        let holding = sqlx::query_as::<_, Holding>(
            "SELECT * FROM holdings WHERE portfolio_id = ? AND symbol = ?",
        )
        .bind(portfolio_id)
        .bind(symbol)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(holding)
    }

    async fn earliest_lot_date(
        &self,
        portfolio_id: i64,
        symbol: &str,
    ) -> Result<Option<NaiveDate>> {
        let date = sqlx::query_scalar::<_, Option<NaiveDate>>(
            "SELECT MIN(purchase_date) FROM tax_lots WHERE portfolio_id = ? AND symbol = ?",
        )
        .bind(portfolio_id)
        .bind(symbol)
        .fetch_one(self.db.pool())
        .await?;

        Ok(date)
    }

    async fn count_recent_buys(
        &self,
        portfolio_id: i64,
        symbol: &str,
        since: NaiveDate,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM transactions
            WHERE portfolio_id = ? AND symbol = ? AND action = 'buy' AND trade_date >= ?
            "#,
        )
        .bind(portfolio_id)
        .bind(symbol)
        .bind(since)
        .fetch_one(self.db.pool())
        .await?;

        Ok(count)
    }

    async fn insert_wash_sale(&self, input: &WashSaleInput) -> Result<i64> {
        let mut tx = self.db.pool().begin().await?;
        let id = insert_wash_sale_row(&mut tx, input).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn list_wash_sales(
        &self,
        user_id: i64,
        portfolio_id: Option<i64>,
    ) -> Result<Vec<WashSaleRecord>> {
        let windows = match portfolio_id {
            Some(pid) => {
                sqlx::query_as::<_, WashSaleRecord>(
                    r#"
                    SELECT * FROM wash_sale_windows
                    WHERE user_id = ? AND portfolio_id = ?
                    ORDER BY sale_date DESC
                    "#,
                )
                .bind(user_id)
                .bind(pid)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, WashSaleRecord>(
                    "SELECT * FROM wash_sale_windows WHERE user_id = ? ORDER BY sale_date DESC",
                )
                .bind(user_id)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        Ok(windows)
    }

    async fn expire_windows(&self, user_id: i64, as_of: NaiveDate) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE wash_sale_windows SET status = 'expired'
            WHERE user_id = ? AND status = 'active' AND window_end < ?
            "#,
        )
        .bind(user_id)
        .bind(as_of)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_history(
        &self,
        portfolio_id: i64,
        limit: i64,
    ) -> Result<Vec<HarvestHistoryRecord>> {
        let records = sqlx::query_as::<_, HarvestHistoryRecord>(
            r#"
            SELECT * FROM harvest_history
            WHERE portfolio_id = ? ORDER BY executed_at DESC LIMIT ?
            "#,
        )
        .bind(portfolio_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(records)
    }

    async fn list_history_for_year(
        &self,
        portfolio_id: i64,
        year: i32,
    ) -> Result<Vec<HarvestHistoryRecord>> {
        let records = sqlx::query_as::<_, HarvestHistoryRecord>(
            r#"
            SELECT * FROM harvest_history
            WHERE portfolio_id = ? AND CAST(strftime('%Y', executed_at) AS INTEGER) = ?
            ORDER BY executed_at DESC
            "#,
        )
        .bind(portfolio_id)
        .bind(year)
        .fetch_all(self.db.pool())
        .await?;

        Ok(records)
    }

    async fn carryforward_rows(&self, user_id: i64) -> Result<Vec<CarryforwardBalance>> {
        let rows = sqlx::query_as::<_, CarryforwardBalance>(
            r#"
            SELECT * FROM carryforward_balances
            WHERE user_id = ? AND remaining_balance > 0
            ORDER BY tax_year ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows)
    }

    async fn apply_carryforward(
        &self,
        user_id: i64,
        tax_year: i32,
        delta: &CarryforwardDelta,
        idempotency_key: Option<&str>,
    ) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;

        if let Some(key) = idempotency_key {
            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO carryforward_keys (idempotency_key, user_id) VALUES (?, ?)",
            )
            .bind(key)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                // Duplicate submission; the delta was already applied.
                return Ok(false);
            }
        }

        upsert_carryforward_row(&mut tx, user_id, tax_year, delta).await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn get_preferences(&self, user_id: i64) -> Result<Option<UserTaxPreferences>> {
        let prefs = sqlx::query_as::<_, UserTaxPreferences>(
            "SELECT * FROM tax_preferences WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(prefs)
    }

    async fn upsert_preferences(&self, prefs: &UserTaxPreferences) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tax_preferences
                (user_id, federal_tax_bracket, state, state_tax_rate, default_lot_method,
                 min_harvest_threshold_pct, auto_harvest_enabled, short_term_rate, long_term_rate)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                federal_tax_bracket = excluded.federal_tax_bracket,
                state = excluded.state,
                state_tax_rate = excluded.state_tax_rate,
                default_lot_method = excluded.default_lot_method,
                min_harvest_threshold_pct = excluded.min_harvest_threshold_pct,
                auto_harvest_enabled = excluded.auto_harvest_enabled,
                short_term_rate = excluded.short_term_rate,
                long_term_rate = excluded.long_term_rate
            "#,
        )
        .bind(prefs.user_id)
        .bind(prefs.federal_tax_bracket)
        .bind(&prefs.state)
        .bind(prefs.state_tax_rate)
        .bind(&prefs.default_lot_method)
        .bind(prefs.min_harvest_threshold_pct)
        .bind(prefs.auto_harvest_enabled)
        .bind(prefs.short_term_rate)
        .bind(prefs.long_term_rate)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    async fn commit_harvest(&self, commit: &HarvestCommit) -> Result<i64> {
        let mut tx = self.db.pool().begin().await?;

        // The conditional delete serializes concurrent executes on the same
        // holding: the loser sees zero rows and the transaction never lands.
        let deleted = sqlx::query("DELETE FROM holdings WHERE portfolio_id = ? AND symbol = ?")
            .bind(commit.portfolio_id)
            .bind(&commit.symbol)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(HarvestError::NotFound(format!(
                "holding {} not found in portfolio {} (already liquidated?)",
                commit.symbol, commit.portfolio_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO transactions (portfolio_id, symbol, action, shares, price, trade_date, harvest_id)
            VALUES (?, ?, 'sell', ?, ?, ?, ?)
            "#,
        )
        .bind(commit.portfolio_id)
        .bind(&commit.symbol)
        .bind(commit.shares)
        .bind(commit.sale_price)
        .bind(commit.sale_date)
        .bind(&commit.harvest_id)
        .execute(&mut *tx)
        .await?;

        if let Some(rep) = &commit.replacement {
            sqlx::query(
                r#"
                INSERT INTO transactions (portfolio_id, symbol, action, shares, price, trade_date, harvest_id)
                VALUES (?, ?, 'buy', ?, ?, ?, ?)
                "#,
            )
            .bind(commit.portfolio_id)
            .bind(&rep.symbol)
            .bind(rep.shares)
            .bind(rep.price)
            .bind(commit.sale_date)
            .bind(&commit.harvest_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO holdings (portfolio_id, symbol, shares, avg_cost_basis, sector)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(portfolio_id, symbol) DO UPDATE SET
                    avg_cost_basis = (holdings.shares * holdings.avg_cost_basis
                        + excluded.shares * excluded.avg_cost_basis)
                        / (holdings.shares + excluded.shares),
                    shares = holdings.shares + excluded.shares
                "#,
            )
            .bind(commit.portfolio_id)
            .bind(&rep.symbol)
            .bind(rep.shares)
            .bind(rep.price)
            .bind(&rep.sector)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO tax_lots (portfolio_id, symbol, purchase_date, shares, cost_per_share)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(commit.portfolio_id)
            .bind(&rep.symbol)
            .bind(commit.sale_date)
            .bind(rep.shares)
            .bind(rep.price)
            .execute(&mut *tx)
            .await?;
        }

        let wash_input = WashSaleInput {
            user_id: commit.user_id,
            portfolio_id: commit.portfolio_id,
            symbol: commit.symbol.clone(),
            sale_date: commit.sale_date,
            shares_sold: commit.shares,
            sale_price: commit.sale_price,
            cost_basis: commit.cost_basis,
            realized_loss: commit.realized_loss,
            window_start: commit.window_start,
            window_end: commit.window_end,
            replacement_symbol: commit.replacement.as_ref().map(|r| r.symbol.clone()),
        };
        insert_wash_sale_row(&mut tx, &wash_input).await?;

        let history = sqlx::query(
            r#"
            INSERT INTO harvest_history
                (harvest_id, user_id, portfolio_id, symbol, shares_sold, sale_price,
                 cost_basis, realized_loss, tax_savings, holding_period, lot_method,
                 replacement_symbol, replacement_shares, replacement_price,
                 wash_sale_safe, executed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&commit.harvest_id)
        .bind(commit.user_id)
        .bind(commit.portfolio_id)
        .bind(&commit.symbol)
        .bind(commit.shares)
        .bind(commit.sale_price)
        .bind(commit.cost_basis)
        .bind(commit.realized_loss)
        .bind(commit.tax_savings)
        .bind(&commit.holding_period)
        .bind(&commit.lot_method)
        .bind(commit.replacement.as_ref().map(|r| r.symbol.clone()))
        .bind(commit.replacement.as_ref().map(|r| r.shares))
        .bind(commit.replacement.as_ref().map(|r| r.price))
        .bind(commit.wash_sale_safe)
        .bind(commit.executed_at)
        .execute(&mut *tx)
        .await?;

        if let Some((tax_year, delta)) = &commit.carryforward {
            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO carryforward_keys (idempotency_key, user_id) VALUES (?, ?)",
            )
            .bind(&commit.harvest_id)
            .bind(commit.user_id)
            .execute(&mut *tx)
            .await?;

            // A replayed harvest id must not double-count the delta.
            if inserted.rows_affected() > 0 {
                upsert_carryforward_row(&mut tx, commit.user_id, *tax_year, delta).await?;
            }
        }

        tx.commit().await?;

        tracing::info!(
            portfolio_id = commit.portfolio_id,
            symbol = %commit.symbol,
            realized_loss = commit.realized_loss,
            "harvest committed"
        );

        Ok(history.last_insert_rowid())
    }
}
