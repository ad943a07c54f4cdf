//! PostGIS backed containment oracle.
//!
//! Zones are the drawn polygons of the `geopolygon` table (SRID 4326).
//! Vessel positions come from the track table; only the latest position of
//! each vessel inside the freshness window is tested.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use geoguard_core::{Sighting, ZoneId};

use crate::error::StoreError;
use crate::oracle::{ContainmentOracle, GeometrySource};

/// Table and column names of the spatial schema
#[derive(Debug, Clone)]
pub struct PostgisSchema {
    pub zone_table: String,
    pub zone_id_column: String,
    pub zone_name_column: String,
    pub zone_geometry_column: String,
    pub position_table: String,
    pub vessel_id_column: String,
    pub latitude_column: String,
    pub longitude_column: String,
    pub time_column: String,
}

impl Default for PostgisSchema {
    fn default() -> Self {
        PostgisSchema {
            zone_table: "public.geopolygon".to_owned(),
            zone_id_column: "gpolygonid".to_owned(),
            zone_name_column: "gpolygonname".to_owned(),
            zone_geometry_column: "gpolygon".to_owned(),
            position_table: "track_list".to_owned(),
            vessel_id_column: "mmsi".to_owned(),
            latitude_column: "latitude".to_owned(),
            longitude_column: "longitude".to_owned(),
            time_column: "updated_at".to_owned(),
        }
    }
}

impl PostgisSchema {
    fn containment_query(&self) -> String {
        format!(
            "WITH latest AS ( \
                SELECT DISTINCT ON (p.{vessel}) p.{vessel} AS vessel, p.{lat} AS lat, p.{lon} AS lon \
                FROM {positions} p \
                WHERE p.{time} >= NOW() - make_interval(secs => $2) \
                ORDER BY p.{vessel}, p.{time} DESC \
             ) \
             SELECT latest.vessel::text, z.{zone_id}::text \
             FROM latest \
             JOIN {zones} z \
               ON z.{zone_id}::text = ANY($1) \
              AND ST_Contains(z.{geometry}, ST_SetSRID(ST_MakePoint(latest.lon, latest.lat), 4326))",
            vessel = self.vessel_id_column,
            lat = self.latitude_column,
            lon = self.longitude_column,
            positions = self.position_table,
            time = self.time_column,
            zone_id = self.zone_id_column,
            zones = self.zone_table,
            geometry = self.zone_geometry_column,
        )
    }

    fn names_query(&self) -> String {
        format!(
            "SELECT {zone_id}::text, {name} FROM {zones} WHERE {zone_id}::text = ANY($1)",
            zone_id = self.zone_id_column,
            name = self.zone_name_column,
            zones = self.zone_table,
        )
    }
}

pub struct PostgisOracle {
    pool: PgPool,
    containment_sql: String,
    names_sql: String,
}

impl PostgisOracle {
    /// Create the oracle without connecting; connections are opened on the
    /// first query, so a database outage only fails poll cycles.
    pub fn connect_lazy(url: &str, schema: PostgisSchema) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(url)?;
        Ok(Self::with_pool(pool, schema))
    }

    pub fn with_pool(pool: PgPool, schema: PostgisSchema) -> Self {
        PostgisOracle {
            pool,
            containment_sql: schema.containment_query(),
            names_sql: schema.names_query(),
        }
    }
}

fn zone_id_strings(zones: &[ZoneId]) -> Vec<String> {
    zones.iter().map(|z| z.as_str().to_owned()).collect()
}

#[async_trait]
impl ContainmentOracle for PostgisOracle {
    async fn vessels_inside(
        &self,
        zones: &[ZoneId],
        window: Duration,
    ) -> Result<HashSet<Sighting>, StoreError> {
        if zones.is_empty() {
            return Ok(HashSet::new());
        }

        let rows: Vec<(String, String)> = sqlx::query_as(&self.containment_sql)
            .bind(zone_id_strings(zones))
            .bind(window.as_secs_f64())
            .fetch_all(&self.pool)
            .await?;

        log::trace!("Containment query returned {} rows", rows.len());
        Ok(rows
            .into_iter()
            .map(|(vessel, zone)| Sighting::new(vessel, zone))
            .collect())
    }
}

#[async_trait]
impl GeometrySource for PostgisOracle {
    async fn zone_names(&self, zones: &[ZoneId]) -> Result<HashMap<ZoneId, String>, StoreError> {
        if zones.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<(String, Option<String>)> = sqlx::query_as(&self.names_sql)
            .bind(zone_id_strings(zones))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, name)| name.map(|name| (ZoneId::new(id), name)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schema_queries() {
        let schema = PostgisSchema::default();

        let sql = schema.containment_query();
        assert!(sql.contains("FROM track_list p"));
        assert!(sql.contains("JOIN public.geopolygon z"));
        assert!(sql.contains("z.gpolygonid::text = ANY($1)"));
        assert!(sql.contains("make_interval(secs => $2)"));
        assert!(sql.contains("ST_MakePoint(latest.lon, latest.lat)"));

        let sql = schema.names_query();
        assert_eq!(
            sql,
            "SELECT gpolygonid::text, gpolygonname FROM public.geopolygon WHERE gpolygonid::text = ANY($1)"
        );
    }

    #[tokio::test]
    async fn test_empty_zone_list_skips_database() {
        // Nothing listens here; a query would fail
        let oracle =
            PostgisOracle::connect_lazy("postgres://nobody@127.0.0.1:1/none", PostgisSchema::default())
                .unwrap();

        let inside = oracle.vessels_inside(&[], Duration::from_secs(300)).await.unwrap();
        assert!(inside.is_empty());
        let names = oracle.zone_names(&[]).await.unwrap();
        assert!(names.is_empty());
    }
}
