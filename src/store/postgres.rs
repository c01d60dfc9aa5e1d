//! PostgreSQL-backed pending transaction store

use super::{PendingTransaction, TxStore};
use crate::config::DatabaseConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

const SELECT_COLUMNS: &str = "nonce, tx_hash, gas_price::TEXT AS gas_price, \
     gas_limit::TEXT AS gas_limit, to_address, call_data, signed_payload, submitted_at";

/// Durable store; survives relay restarts so resend decisions can resume
pub struct PgTxStore {
    pool: PgPool,
}

impl PgTxStore {
    /// Connect to the database
    pub async fn new(config: &DatabaseConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relay_pending_transactions (
                nonce BIGINT PRIMARY KEY,
                tx_hash VARCHAR(66) NOT NULL,
                gas_price NUMERIC(78, 0) NOT NULL,
                gas_limit NUMERIC(78, 0) NOT NULL,
                to_address VARCHAR(42) NOT NULL,
                call_data BYTEA NOT NULL,
                signed_payload BYTEA NOT NULL,
                submitted_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn nonce_param(nonce: u64) -> RelayerResult<i64> {
        i64::try_from(nonce)
            .map_err(|_| RelayerError::Internal(format!("Nonce {} does not fit BIGINT", nonce)))
    }

    fn decode_row(row: &PgRow) -> RelayerResult<PendingTransaction> {
        let corrupt = |column: &str, e: String| {
            RelayerError::Internal(format!("Corrupt {} in pending store: {}", column, e))
        };

        let tx_hash: String = row.try_get("tx_hash")?;
        let gas_price: String = row.try_get("gas_price")?;
        let gas_limit: String = row.try_get("gas_limit")?;
        let to_address: String = row.try_get("to_address")?;
        let call_data: Vec<u8> = row.try_get("call_data")?;
        let signed_payload: Vec<u8> = row.try_get("signed_payload")?;
        let submitted_at: DateTime<Utc> = row.try_get("submitted_at")?;

        Ok(PendingTransaction {
            nonce: row.try_get::<i64, _>("nonce")? as u64,
            hash: tx_hash
                .parse::<H256>()
                .map_err(|e| corrupt("tx_hash", e.to_string()))?,
            gas_price: U256::from_dec_str(&gas_price)
                .map_err(|e| corrupt("gas_price", e.to_string()))?,
            gas_limit: U256::from_dec_str(&gas_limit)
                .map_err(|e| corrupt("gas_limit", e.to_string()))?,
            to: to_address
                .parse::<Address>()
                .map_err(|e| corrupt("to_address", e.to_string()))?,
            data: Bytes::from(call_data),
            signed_payload: Bytes::from(signed_payload),
            submitted_at,
        })
    }
}

#[async_trait]
impl TxStore for PgTxStore {
    async fn insert(&self, tx: PendingTransaction) -> RelayerResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO relay_pending_transactions
                (nonce, tx_hash, gas_price, gas_limit, to_address, call_data, signed_payload, submitted_at)
            VALUES ($1, $2, $3::NUMERIC, $4::NUMERIC, $5, $6, $7, $8)
            "#,
        )
        .bind(Self::nonce_param(tx.nonce)?)
        .bind(format!("{:?}", tx.hash))
        .bind(tx.gas_price.to_string())
        .bind(tx.gas_limit.to_string())
        .bind(format!("{:?}", tx.to))
        .bind(tx.data.to_vec())
        .bind(tx.signed_payload.to_vec())
        .bind(tx.submitted_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Persisted pending tx {:?} at nonce {}", tx.hash, tx.nonce);
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(RelayerError::DuplicateNonce { nonce: tx.nonce })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_first(&self) -> RelayerResult<Option<PendingTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM relay_pending_transactions ORDER BY nonce ASC LIMIT 1",
            SELECT_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode_row).transpose()
    }

    async fn remove(&self, nonce: u64) -> RelayerResult<Option<PendingTransaction>> {
        let row = sqlx::query(&format!(
            "DELETE FROM relay_pending_transactions WHERE nonce = $1 RETURNING {}",
            SELECT_COLUMNS
        ))
        .bind(Self::nonce_param(nonce)?)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode_row).transpose()
    }

    async fn replace(&self, nonce: u64, tx: PendingTransaction) -> RelayerResult<()> {
        if tx.nonce != nonce {
            return Err(RelayerError::Internal(format!(
                "Replacement for nonce {} carries nonce {}",
                nonce, tx.nonce
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE relay_pending_transactions
            SET tx_hash = $2,
                gas_price = $3::NUMERIC,
                gas_limit = $4::NUMERIC,
                to_address = $5,
                call_data = $6,
                signed_payload = $7,
                submitted_at = $8,
                updated_at = NOW()
            WHERE nonce = $1
            "#,
        )
        .bind(Self::nonce_param(nonce)?)
        .bind(format!("{:?}", tx.hash))
        .bind(tx.gas_price.to_string())
        .bind(tx.gas_limit.to_string())
        .bind(format!("{:?}", tx.to))
        .bind(tx.data.to_vec())
        .bind(tx.signed_payload.to_vec())
        .bind(tx.submitted_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RelayerError::PendingNotFound { nonce });
        }
        Ok(())
    }

    async fn clear(&self) -> RelayerResult<()> {
        let result = sqlx::query("DELETE FROM relay_pending_transactions")
            .execute(&self.pool)
            .await?;
        info!("Cleared {} pending transactions", result.rows_affected());
        Ok(())
    }

    async fn list(&self) -> RelayerResult<Vec<PendingTransaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM relay_pending_transactions ORDER BY nonce ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::decode_row).collect()
    }

    async fn len(&self) -> RelayerResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS pending FROM relay_pending_transactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("pending")? as usize)
    }
}
