//! Fraud detection reports
//!
//! Read-only queries over `transactions`. Distances use the haversine formula
//! and location clustering snaps coordinates to a fixed degree grid, both in
//! plain SQL so no database extension is needed.

use serde::Serialize;
use sqlx::types::BigDecimal;
use sqlx::{FromRow, PgPool};
use tracing::info;

use crate::error::{IngestError, IngestResult};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Parameters shared by the report queries
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReportOptions {
    /// Minimum distance between two of a user's transactions to flag them
    pub distance_threshold_meters: f64,
    /// Grid cells need strictly more failures than this to be listed
    pub failure_threshold: i64,
    /// Grid cell size in degrees
    pub cell_degrees: f64,
    pub agent_window_days: i32,
    pub agent_limit: i64,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            distance_threshold_meters: 5_000.0,
            failure_threshold: 2,
            cell_degrees: 1.5,
            agent_window_days: 365,
            agent_limit: 50,
        }
    }
}

/// A user whose transactions are far apart
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct DistantUser {
    pub email: String,
    pub max_distance_meters: f64,
}

/// A grid cell with repeated failed transactions
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct FailedLocation {
    pub grid_lat: f64,
    pub grid_lon: f64,
    pub failed_transaction_count: i64,
}

/// Successful transaction volume for one agent
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct AgentTotal {
    pub agent_name: Option<String>,
    pub total_transaction_amount: Option<BigDecimal>,
}

/// Results of every report
#[derive(Debug, Clone, Default)]
pub struct ReportSet {
    pub distant_users: Vec<DistantUser>,
    pub failed_locations: Vec<FailedLocation>,
    pub top_agents: Vec<AgentTotal>,
}

const DISTANT_USERS_SQL: &str = "
    WITH user_transactions AS (
        SELECT email, created_at, lat::float8 AS lat, lon::float8 AS lon
        FROM transactions
        WHERE email IS NOT NULL AND lat IS NOT NULL AND lon IS NOT NULL
    ),
    pairs AS (
        SELECT
            ut1.email,
            2 * $1 * ASIN(LEAST(1.0, SQRT(
                POWER(SIN(RADIANS(ut2.lat - ut1.lat) / 2), 2)
                + COS(RADIANS(ut1.lat)) * COS(RADIANS(ut2.lat))
                * POWER(SIN(RADIANS(ut2.lon - ut1.lon) / 2), 2)
            ))) AS distance_meters
        FROM user_transactions ut1
        JOIN user_transactions ut2
            ON ut1.email = ut2.email
            AND ut1.created_at < ut2.created_at
    )
    SELECT email, MAX(distance_meters) AS max_distance_meters
    FROM pairs
    GROUP BY email
    HAVING MAX(distance_meters) > $2
    ORDER BY max_distance_meters DESC";

const FAILED_LOCATIONS_SQL: &str = "
    SELECT
        ROUND(lat::float8 / $2) * $2 AS grid_lat,
        ROUND(lon::float8 / $2) * $2 AS grid_lon,
        COUNT(*) AS failed_transaction_count
    FROM transactions
    WHERE status = 'Failed' AND lat IS NOT NULL AND lon IS NOT NULL
    GROUP BY 1, 2
    HAVING COUNT(*) > $1
    ORDER BY failed_transaction_count DESC, grid_lat, grid_lon";

const TOP_AGENTS_SQL: &str = "
    SELECT agent_name, SUM(amount) AS total_transaction_amount
    FROM transactions
    WHERE status = 'Success'
        AND created_at >= NOW() - make_interval(days => $1)
    GROUP BY agent_name
    ORDER BY total_transaction_amount DESC NULLS LAST
    LIMIT $2";

/// Runs the fraud detection queries
#[derive(Debug, Clone)]
pub struct FraudReports {
    db: PgPool,
}

impl FraudReports {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Users whose consecutive transactions are more than `threshold_meters` apart
    pub async fn users_with_distant_locations(
        &self,
        threshold_meters: f64,
    ) -> IngestResult<Vec<DistantUser>> {
        let users: Vec<DistantUser> = sqlx::query_as(DISTANT_USERS_SQL)
            .bind(EARTH_RADIUS_METERS)
            .bind(threshold_meters)
            .fetch_all(&self.db)
            .await
            .map_err(|source| IngestError::Report {
                report: "users_with_distant_locations",
                source,
            })?;

        info!(
            users = users.len(),
            threshold_meters, "Retrieved users transacting from multiple far locations"
        );
        Ok(users)
    }

    /// Grid cells with more than `threshold` failed transactions
    pub async fn failed_transactions_by_location(
        &self,
        threshold: i64,
        cell_degrees: f64,
    ) -> IngestResult<Vec<FailedLocation>> {
        if cell_degrees <= 0.0 {
            return Err(IngestError::config("cell size must be positive"));
        }

        let cells: Vec<FailedLocation> = sqlx::query_as(FAILED_LOCATIONS_SQL)
            .bind(threshold)
            .bind(cell_degrees)
            .fetch_all(&self.db)
            .await
            .map_err(|source| IngestError::Report {
                report: "failed_transactions_by_location",
                source,
            })?;

        info!(
            cells = cells.len(),
            threshold, "Retrieved locations with failed transactions exceeding threshold"
        );
        Ok(cells)
    }

    /// Agents ranked by successful transaction amount over the last `window_days`
    pub async fn top_agents(&self, window_days: i32, limit: i64) -> IngestResult<Vec<AgentTotal>> {
        let agents: Vec<AgentTotal> = sqlx::query_as(TOP_AGENTS_SQL)
            .bind(window_days)
            .bind(limit)
            .fetch_all(&self.db)
            .await
            .map_err(|source| IngestError::Report {
                report: "top_agents",
                source,
            })?;

        info!(
            agents = agents.len(),
            window_days, "Retrieved top agents by transaction amount"
        );
        Ok(agents)
    }

    pub async fn run_all(&self, options: &ReportOptions) -> IngestResult<ReportSet> {
        Ok(ReportSet {
            distant_users: self
                .users_with_distant_locations(options.distance_threshold_meters)
                .await?,
            failed_locations: self
                .failed_transactions_by_location(options.failure_threshold, options.cell_degrees)
                .await?,
            top_agents: self
                .top_agents(options.agent_window_days, options.agent_limit)
                .await?,
        })
    }
}

/// Great-circle distance between two points in meters
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().min(1.0).asin()
}
