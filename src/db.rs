use crate::error::{ImportError, Result};
use crate::geometry::{BoundingBox, Ring, SRID_WGS84};
use crate::parcel::{CanonicalParcel, OwnerRecord, RawAttributeRecord, StoredParcel};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// SQLite's default bound-parameter ceiling (SQLITE_MAX_VARIABLE_NUMBER).
const MAX_SQL_VARIABLES: usize = 32766;

/// Columns written by the batch loader, in parameter order.
const INSERT_COLUMNS: [&str; 28] = [
    "parcel_uuid",
    "created_at",
    "source_file",
    "city",
    "district",
    "section_code",
    "section_name",
    "parcel_no",
    "area",
    "land_use_zone",
    "land_use_type",
    "announced_value",
    "announced_land_price",
    "owner_name",
    "owner_id",
    "owner_type",
    "right_range_type",
    "right_denominator",
    "right_numerator",
    "declared_land_price",
    "manager_name",
    "has_owner",
    "geometry",
    "srid",
    "min_lon",
    "min_lat",
    "max_lon",
    "max_lat",
];

/// Columns read back into a [`StoredParcel`], in row index order.
const PARCEL_COLUMNS: &str = "id, parcel_uuid, created_at, source_file,
    city, district, section_code, section_name, parcel_no, area,
    land_use_zone, land_use_type, announced_value, announced_land_price,
    owner_name, owner_id, owner_type, right_range_type, right_denominator,
    right_numerator, declared_land_price, manager_name, geometry, has_owner";

// ============================================================================
// SCHEMA
// ============================================================================

/// Open (or create) the store. Failure here is the one fatal error of a run.
pub fn open_store(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(|source| ImportError::Connection {
        path: path.to_path_buf(),
        source,
    })?;
    setup_database(&conn).map_err(|e| match e {
        ImportError::Store(source) => ImportError::Connection {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL so readers see committed pairs while the import is running
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lands (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parcel_uuid TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL,
            source_file TEXT,
            city TEXT,
            district TEXT,
            section_code TEXT,
            section_name TEXT,
            parcel_no TEXT NOT NULL,
            area REAL,
            land_use_zone TEXT,
            land_use_type TEXT,
            announced_value INTEGER,
            announced_land_price INTEGER,
            owner_name TEXT,
            owner_id TEXT,
            owner_type TEXT,
            right_range_type TEXT,
            right_denominator INTEGER,
            right_numerator INTEGER,
            declared_land_price INTEGER,
            manager_name TEXT,
            has_owner INTEGER NOT NULL DEFAULT 0,
            geometry TEXT NOT NULL CHECK (geometry LIKE 'POLYGON((%))'),
            srid INTEGER NOT NULL DEFAULT 4326,
            min_lon REAL NOT NULL,
            min_lat REAL NOT NULL,
            max_lon REAL NOT NULL,
            max_lat REAL NOT NULL
        )",
        [],
    )?;

    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_lands_city ON lands(city);
         CREATE INDEX IF NOT EXISTS idx_lands_district ON lands(district);
         CREATE INDEX IF NOT EXISTS idx_lands_section_code ON lands(section_code);
         CREATE INDEX IF NOT EXISTS idx_lands_owner_name ON lands(owner_name);
         CREATE INDEX IF NOT EXISTS idx_lands_source_file ON lands(source_file);
         CREATE INDEX IF NOT EXISTS idx_lands_bbox ON lands(min_lon, max_lon, min_lat, max_lat);",
    )?;

    Ok(())
}

/// Force committed WAL frames into the main database file.
///
/// Returns `(busy, wal_frames, checkpointed_frames)` as reported by SQLite.
pub fn checkpoint(conn: &Connection) -> Result<(i64, i64, i64)> {
    let result = conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    })?;
    Ok(result)
}

pub fn count_parcels(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM lands", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// BATCH LOADER
// ============================================================================

/// Persists one file pair's parcels inside a single transaction.
///
/// Rows go out as multi-row INSERTs of at most `batch_size` rows. Any failure
/// rolls the whole pair back; the loader never retries.
#[derive(Debug, Clone, Copy)]
pub struct BatchLoader {
    batch_size: usize,
}

impl BatchLoader {
    pub fn new(batch_size: usize) -> Self {
        let max_rows = MAX_SQL_VARIABLES / INSERT_COLUMNS.len();
        BatchLoader {
            batch_size: batch_size.clamp(1, max_rows),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Insert all parcels or none. Returns the number of rows committed.
    pub fn load(
        &self,
        conn: &mut Connection,
        source_file: &str,
        parcels: &[CanonicalParcel],
    ) -> Result<usize> {
        if parcels.is_empty() {
            return Ok(0);
        }

        // Dropping `tx` on an early return rolls back.
        let tx = conn.transaction()?;
        let created_at = Utc::now().to_rfc3339();

        for (batch_no, chunk) in parcels.chunks(self.batch_size).enumerate() {
            let mut stmt = tx.prepare_cached(&insert_sql(chunk.len()))?;
            let values: Vec<Value> = chunk
                .iter()
                .flat_map(|parcel| row_values(parcel, source_file, &created_at))
                .collect();
            stmt.execute(params_from_iter(values))?;

            debug!(
                source_file,
                batch = batch_no + 1,
                rows = chunk.len(),
                "Inserted batch"
            );
        }

        tx.commit()?;
        Ok(parcels.len())
    }
}

impl Default for BatchLoader {
    fn default() -> Self {
        BatchLoader::new(crate::config::DEFAULT_BATCH_SIZE)
    }
}

fn insert_sql(rows: usize) -> String {
    let row = format!("({})", vec!["?"; INSERT_COLUMNS.len()].join(", "));
    format!(
        "INSERT INTO lands ({}) VALUES {}",
        INSERT_COLUMNS.join(", "),
        vec![row; rows].join(", ")
    )
}

fn row_values(parcel: &CanonicalParcel, source_file: &str, created_at: &str) -> Vec<Value> {
    let record = &parcel.record;
    let owner = record.owner_fields();
    let bbox = parcel.boundary.bbox();

    vec![
        Value::from(uuid::Uuid::new_v4().to_string()),
        Value::from(created_at.to_string()),
        Value::from(source_file.to_string()),
        Value::from(record.city.clone()),
        Value::from(record.district.clone()),
        Value::from(record.section_code.clone()),
        Value::from(record.section_name.clone()),
        Value::from(record.parcel_no.clone()),
        Value::from(record.area),
        Value::from(record.land_use_zone.clone()),
        Value::from(record.land_use_type.clone()),
        Value::from(record.announced_value),
        Value::from(record.announced_land_price),
        Value::from(owner.name),
        Value::from(owner.id),
        Value::from(owner.owner_type),
        Value::from(owner.right_range_type),
        Value::from(owner.right_denominator),
        Value::from(owner.right_numerator),
        Value::from(owner.declared_land_price),
        Value::from(owner.manager_name),
        Value::from(record.owner.is_some()),
        Value::from(parcel.boundary.to_wkt()),
        Value::from(SRID_WGS84),
        Value::from(bbox.min_lon),
        Value::from(bbox.min_lat),
        Value::from(bbox.max_lon),
        Value::from(bbox.max_lat),
    ]
}

// ============================================================================
// READ QUERIES
// ============================================================================

fn row_to_parcel(row: &Row) -> rusqlite::Result<StoredParcel> {
    let created_at: String = row.get(2)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    let owner = OwnerRecord {
        name: row.get(14)?,
        id: row.get(15)?,
        owner_type: row.get(16)?,
        right_range_type: row.get(17)?,
        right_denominator: row.get(18)?,
        right_numerator: row.get(19)?,
        declared_land_price: row.get(20)?,
        manager_name: row.get(21)?,
    };
    // An owner element with every field blank still reads back as present.
    let has_owner: bool = row.get(23)?;
    let owner = if has_owner { Some(owner) } else { None };

    let geometry: String = row.get(22)?;

    Ok(StoredParcel {
        id: row.get(0)?,
        parcel_uuid: row.get(1)?,
        created_at,
        source_file: row.get(3)?,
        record: RawAttributeRecord {
            city: row.get(4)?,
            district: row.get(5)?,
            section_code: row.get(6)?,
            section_name: row.get(7)?,
            parcel_no: row.get(8)?,
            area: row.get(9)?,
            land_use_zone: row.get(10)?,
            land_use_type: row.get(11)?,
            announced_value: row.get(12)?,
            announced_land_price: row.get(13)?,
            owner,
        },
        boundary: Ring::from_wkt(&geometry),
    })
}

pub fn get_parcel(conn: &Connection, id: i64) -> Result<Option<StoredParcel>> {
    let sql = format!("SELECT {} FROM lands WHERE id = ?1", PARCEL_COLUMNS);
    let parcel = conn.query_row(&sql, [id], row_to_parcel).optional()?;
    Ok(parcel)
}

pub fn list_parcels(conn: &Connection, limit: usize, offset: usize) -> Result<Vec<StoredParcel>> {
    let sql = format!(
        "SELECT {} FROM lands ORDER BY id LIMIT ?1 OFFSET ?2",
        PARCEL_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let parcels = stmt
        .query_map(params![limit as i64, offset as i64], row_to_parcel)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(parcels)
}

/// Parcels whose boundary envelope intersects `bbox`.
pub fn find_in_bbox(conn: &Connection, bbox: &BoundingBox, limit: usize) -> Result<Vec<StoredParcel>> {
    let sql = format!(
        "SELECT {} FROM lands
         WHERE min_lon <= ?1 AND max_lon >= ?2 AND min_lat <= ?3 AND max_lat >= ?4
         ORDER BY id LIMIT ?5",
        PARCEL_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let parcels = stmt
        .query_map(
            params![bbox.max_lon, bbox.min_lon, bbox.max_lat, bbox.min_lat, limit as i64],
            row_to_parcel,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(parcels)
}

/// Attribute filters; every criterion that is set is AND-ed.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub city: Option<String>,
    pub district: Option<String>,
    pub section_code: Option<String>,
    /// Case-insensitive partial match
    pub section_name: Option<String>,
    /// Case-insensitive partial match
    pub parcel_no: Option<String>,
    /// Case-insensitive partial match
    pub owner_name: Option<String>,
    pub min_area: Option<f64>,
    pub max_area: Option<f64>,
    pub limit: usize,
    pub offset: usize,
}

fn like_pattern(fragment: &str) -> String {
    let escaped = fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

pub fn search_parcels(conn: &Connection, filter: &SearchFilter) -> Result<Vec<StoredParcel>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    let equals = [
        ("city = ?", &filter.city),
        ("district = ?", &filter.district),
        ("section_code = ?", &filter.section_code),
    ];
    for (clause, value) in equals {
        if let Some(v) = value {
            clauses.push(clause);
            values.push(Value::from(v.clone()));
        }
    }

    let partial = [
        ("section_name LIKE ? ESCAPE '\\'", &filter.section_name),
        ("parcel_no LIKE ? ESCAPE '\\'", &filter.parcel_no),
        ("owner_name LIKE ? ESCAPE '\\'", &filter.owner_name),
    ];
    for (clause, value) in partial {
        if let Some(v) = value {
            clauses.push(clause);
            values.push(Value::from(like_pattern(v)));
        }
    }

    if let Some(min) = filter.min_area {
        clauses.push("area >= ?");
        values.push(Value::from(min));
    }
    if let Some(max) = filter.max_area {
        clauses.push("area <= ?");
        values.push(Value::from(max));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM lands {} ORDER BY id LIMIT ? OFFSET ?",
        PARCEL_COLUMNS, where_clause
    );
    values.push(Value::from(filter.limit as i64));
    values.push(Value::from(filter.offset as i64));

    let mut stmt = conn.prepare(&sql)?;
    let parcels = stmt
        .query_map(params_from_iter(values), row_to_parcel)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(parcels)
}

pub fn list_cities(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT city FROM lands WHERE city IS NOT NULL ORDER BY city")?;
    let cities = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(cities)
}

pub fn list_districts(conn: &Connection, city: Option<&str>) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT district FROM lands
         WHERE district IS NOT NULL AND (?1 IS NULL OR city = ?1)
         ORDER BY district",
    )?;
    let districts = stmt
        .query_map([city], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(districts)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub section_code: String,
    pub section_name: Option<String>,
}

pub fn list_sections(
    conn: &Connection,
    city: Option<&str>,
    district: Option<&str>,
) -> Result<Vec<Section>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT section_code, section_name FROM lands
         WHERE section_code IS NOT NULL
           AND (?1 IS NULL OR city = ?1)
           AND (?2 IS NULL OR district = ?2)
         ORDER BY section_code, section_name",
    )?;
    let sections = stmt
        .query_map(params![city, district], |row| {
            Ok(Section {
                section_code: row.get(0)?,
                section_name: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(sections)
}

// ============================================================================
// AGGREGATE STATISTICS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub total_parcels: i64,
    pub total_area: f64,
    pub cities_count: i64,
    pub districts_count: i64,
    /// Average over parcels with a positive announced value
    pub avg_announced_value: Option<f64>,
}

pub fn summary_stats(conn: &Connection) -> Result<SummaryStats> {
    let stats = conn.query_row(
        "SELECT
            COUNT(*),
            COALESCE(SUM(area), 0.0),
            COUNT(DISTINCT city),
            COUNT(DISTINCT district),
            (SELECT AVG(announced_value) FROM lands
              WHERE announced_value IS NOT NULL AND announced_value > 0)
         FROM lands",
        [],
        |row| {
            Ok(SummaryStats {
                total_parcels: row.get(0)?,
                total_area: row.get(1)?,
                cities_count: row.get(2)?,
                districts_count: row.get(3)?,
                avg_announced_value: row.get(4)?,
            })
        },
    )?;
    Ok(stats)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityStats {
    pub city: String,
    pub parcel_count: i64,
    pub total_area: f64,
    pub avg_area: f64,
    pub avg_announced_value: Option<f64>,
}

pub fn stats_by_city(conn: &Connection) -> Result<Vec<CityStats>> {
    let mut stmt = conn.prepare(
        "SELECT city, COUNT(*), COALESCE(SUM(area), 0.0), COALESCE(AVG(area), 0.0),
                AVG(announced_value)
         FROM lands
         WHERE city IS NOT NULL
         GROUP BY city
         ORDER BY COUNT(*) DESC, city",
    )?;
    let stats = stmt
        .query_map([], |row| {
            Ok(CityStats {
                city: row.get(0)?,
                parcel_count: row.get(1)?,
                total_area: row.get(2)?,
                avg_area: row.get(3)?,
                avg_announced_value: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(stats)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistrictStats {
    pub city: Option<String>,
    pub district: String,
    pub parcel_count: i64,
    pub total_area: f64,
    pub avg_area: f64,
}

pub fn stats_by_district(conn: &Connection, city: Option<&str>) -> Result<Vec<DistrictStats>> {
    let mut stmt = conn.prepare(
        "SELECT city, district, COUNT(*), COALESCE(SUM(area), 0.0), COALESCE(AVG(area), 0.0)
         FROM lands
         WHERE district IS NOT NULL AND (?1 IS NULL OR city = ?1)
         GROUP BY city, district
         ORDER BY city, COUNT(*) DESC",
    )?;
    let stats = stmt
        .query_map([city], |row| {
            Ok(DistrictStats {
                city: row.get(0)?,
                district: row.get(1)?,
                parcel_count: row.get(2)?,
                total_area: row.get(3)?,
                avg_area: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(stats)
}

/// Source file statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFileStat {
    pub source_file: String,
    pub parcel_count: i64,
    pub total_area: f64,
    pub first_imported: String,
}

/// Get statistics grouped by source file pair
pub fn source_file_stats(conn: &Connection) -> Result<Vec<SourceFileStat>> {
    let mut stmt = conn.prepare(
        "SELECT source_file, COUNT(*), COALESCE(SUM(area), 0.0), MIN(created_at)
         FROM lands
         WHERE source_file IS NOT NULL
         GROUP BY source_file
         ORDER BY source_file",
    )?;
    let stats = stmt
        .query_map([], |row| {
            Ok(SourceFileStat {
                source_file: row.get(0)?,
                parcel_count: row.get(1)?,
                total_area: row.get(2)?,
                first_imported: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::parse_coordinates;

    fn memory_store() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn create_test_parcel(parcel_no: &str, city: &str, district: &str, area: f64, lon: f64) -> CanonicalParcel {
        let mut record = RawAttributeRecord::new(parcel_no);
        record.city = Some(city.to_string());
        record.district = Some(district.to_string());
        record.section_code = Some("0101".to_string());
        record.section_name = Some("Park Section".to_string());
        record.area = Some(area);
        record.announced_value = Some(1000);

        let coords = format!("{},23.0 {},23.0 {},23.1", lon, lon + 0.1, lon + 0.1);
        CanonicalParcel::new(record, Ring::close(parse_coordinates(&coords)).unwrap())
    }

    fn fail_on(conn: &Connection, parcel_no: &str) {
        conn.execute_batch(&format!(
            "CREATE TRIGGER fail_marker BEFORE INSERT ON lands
             WHEN NEW.parcel_no = '{}'
             BEGIN SELECT RAISE(ABORT, 'simulated failure'); END;",
            parcel_no
        ))
        .unwrap();
    }

    #[test]
    fn test_load_inserts_all_parcels() {
        let mut conn = memory_store();
        let parcels = vec![
            create_test_parcel("00010001", "Taipei", "Zhongzheng", 100.0, 121.0),
            create_test_parcel("00010002", "Taipei", "Daan", 50.0, 121.5),
        ];

        let inserted = BatchLoader::default().load(&mut conn, "A01", &parcels).unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(count_parcels(&conn).unwrap(), 2);
    }

    #[test]
    fn test_load_zero_parcels_is_noop() {
        let mut conn = memory_store();
        assert_eq!(BatchLoader::default().load(&mut conn, "A01", &[]).unwrap(), 0);
        assert_eq!(count_parcels(&conn).unwrap(), 0);
    }

    #[test]
    fn test_load_spans_multiple_batches() {
        let mut conn = memory_store();
        let parcels: Vec<_> = (0..7)
            .map(|i| create_test_parcel(&format!("{:08}", i), "Taipei", "Daan", 10.0, 121.0))
            .collect();

        let loader = BatchLoader::new(3);
        assert_eq!(loader.load(&mut conn, "A01", &parcels).unwrap(), 7);
        assert_eq!(count_parcels(&conn).unwrap(), 7);
    }

    #[test]
    fn test_failure_on_last_row_rolls_back_pair() {
        let mut conn = memory_store();
        let existing = vec![create_test_parcel("KEEP", "Taipei", "Daan", 1.0, 121.0)];
        BatchLoader::default().load(&mut conn, "A00", &existing).unwrap();

        fail_on(&conn, "FAIL");
        let mut parcels: Vec<_> = (0..5)
            .map(|i| create_test_parcel(&format!("P{}", i), "Taipei", "Daan", 10.0, 121.0))
            .collect();
        parcels.push(create_test_parcel("FAIL", "Taipei", "Daan", 10.0, 121.0));

        // Batch size 2 so earlier batches were already executed when the last one fails
        let err = BatchLoader::new(2).load(&mut conn, "A01", &parcels).unwrap_err();

        assert!(matches!(err, ImportError::Store(_)));
        assert!(!err.is_fatal());
        assert_eq!(count_parcels(&conn).unwrap(), 1);
    }

    #[test]
    fn test_batch_size_is_clamped() {
        assert_eq!(BatchLoader::new(0).batch_size(), 1);
        assert_eq!(
            BatchLoader::new(1_000_000).batch_size(),
            MAX_SQL_VARIABLES / INSERT_COLUMNS.len()
        );
    }

    #[test]
    fn test_stored_parcel_round_trip() {
        let mut conn = memory_store();
        let parcel = create_test_parcel("00170001", "Taipei", "Daan", 12.5, 121.0);
        BatchLoader::default().load(&mut conn, "A01", &[parcel.clone()]).unwrap();

        let stored = get_parcel(&conn, 1).unwrap().unwrap();

        assert_eq!(stored.record, parcel.record);
        assert!(stored.record.owner.is_none());
        assert_eq!(stored.boundary, Some(parcel.boundary));
        assert_eq!(stored.source_file.as_deref(), Some("A01"));
        assert_eq!(stored.parcel_uuid.len(), 36);

        let srid: i64 = conn
            .query_row("SELECT srid FROM lands WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(srid, 4326);

        assert!(get_parcel(&conn, 99).unwrap().is_none());
    }

    #[test]
    fn test_unset_owner_fields_stay_null() {
        let mut conn = memory_store();
        let parcel = create_test_parcel("5", "Taipei", "Daan", 1.0, 121.0);
        BatchLoader::default().load(&mut conn, "A01", &[parcel]).unwrap();

        let (owner_name, numerator): (Option<String>, Option<i64>) = conn
            .query_row(
                "SELECT owner_name, right_numerator FROM lands WHERE parcel_no = '5'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(owner_name, None);
        assert_eq!(numerator, None);
    }

    #[test]
    fn test_blank_owner_element_reads_back_as_present() {
        let mut conn = memory_store();
        let mut blank_owner = create_test_parcel("6", "Taipei", "Daan", 1.0, 121.0);
        blank_owner.record.owner = Some(OwnerRecord::default());
        let no_owner = create_test_parcel("7", "Taipei", "Daan", 1.0, 122.0);
        BatchLoader::default()
            .load(&mut conn, "A01", &[blank_owner, no_owner])
            .unwrap();

        let stored = get_parcel(&conn, 1).unwrap().unwrap();
        assert_eq!(stored.record.owner, Some(OwnerRecord::default()));

        let stored = get_parcel(&conn, 2).unwrap().unwrap();
        assert!(stored.record.owner.is_none());
    }

    #[test]
    fn test_bbox_query() {
        let mut conn = memory_store();
        let parcels = vec![
            create_test_parcel("1", "Taipei", "Daan", 1.0, 121.0),
            create_test_parcel("2", "Taipei", "Daan", 1.0, 125.0),
        ];
        BatchLoader::default().load(&mut conn, "A01", &parcels).unwrap();

        let hits = find_in_bbox(&conn, &BoundingBox::new(120.9, 22.9, 121.05, 23.05), 100).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.parcel_no, "1");

        let none = find_in_bbox(&conn, &BoundingBox::new(0.0, 0.0, 1.0, 1.0), 100).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_search_filters() {
        let mut conn = memory_store();
        let mut owned = create_test_parcel("00020003", "Taichung", "West", 300.0, 120.6);
        owned.record.owner = Some(OwnerRecord {
            name: Some("Lin Family Trust".to_string()),
            ..Default::default()
        });
        let parcels = vec![
            create_test_parcel("00010001", "Taipei", "Daan", 100.0, 121.0),
            create_test_parcel("00010002", "Taipei", "Xinyi", 50.0, 121.5),
            owned,
        ];
        BatchLoader::default().load(&mut conn, "A01", &parcels).unwrap();

        let by_city = SearchFilter {
            city: Some("Taipei".to_string()),
            limit: 100,
            ..Default::default()
        };
        assert_eq!(search_parcels(&conn, &by_city).unwrap().len(), 2);

        let by_owner = SearchFilter {
            owner_name: Some("lin family".to_string()),
            limit: 100,
            ..Default::default()
        };
        let hits = search_parcels(&conn, &by_owner).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.owner_fields().name.as_deref(), Some("Lin Family Trust"));

        let by_area = SearchFilter {
            min_area: Some(60.0),
            max_area: Some(200.0),
            limit: 100,
            ..Default::default()
        };
        let hits = search_parcels(&conn, &by_area).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.parcel_no, "00010001");

        let wildcard = SearchFilter {
            parcel_no: Some("%".to_string()),
            limit: 100,
            ..Default::default()
        };
        assert!(search_parcels(&conn, &wildcard).unwrap().is_empty());

        let paged = SearchFilter {
            limit: 1,
            offset: 2,
            ..Default::default()
        };
        let hits = search_parcels(&conn, &paged).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.parcel_no, "00020003");
    }

    #[test]
    fn test_listings_and_stats() {
        let mut conn = memory_store();
        let mut no_value = create_test_parcel("3", "Taichung", "West", 300.0, 120.6);
        no_value.record.announced_value = Some(0);
        let parcels = vec![
            create_test_parcel("1", "Taipei", "Daan", 100.0, 121.0),
            create_test_parcel("2", "Taipei", "Xinyi", 50.0, 121.5),
            no_value,
        ];
        BatchLoader::default().load(&mut conn, "A01", &parcels[..2]).unwrap();
        BatchLoader::default().load(&mut conn, "B01", &parcels[2..]).unwrap();

        assert_eq!(list_cities(&conn).unwrap(), vec!["Taichung", "Taipei"]);
        assert_eq!(list_districts(&conn, Some("Taipei")).unwrap(), vec!["Daan", "Xinyi"]);
        assert_eq!(list_districts(&conn, None).unwrap().len(), 3);
        assert_eq!(list_sections(&conn, None, None).unwrap().len(), 1);

        let summary = summary_stats(&conn).unwrap();
        assert_eq!(summary.total_parcels, 3);
        assert_eq!(summary.total_area, 450.0);
        assert_eq!(summary.cities_count, 2);
        assert_eq!(summary.districts_count, 3);
        assert_eq!(summary.avg_announced_value, Some(1000.0));

        let cities = stats_by_city(&conn).unwrap();
        assert_eq!(cities[0].city, "Taipei");
        assert_eq!(cities[0].parcel_count, 2);
        assert_eq!(cities[0].avg_area, 75.0);

        let districts = stats_by_district(&conn, Some("Taichung")).unwrap();
        assert_eq!(districts.len(), 1);
        assert_eq!(districts[0].district, "West");

        let sources = source_file_stats(&conn).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].source_file, "A01");
        assert_eq!(sources[0].parcel_count, 2);

        assert_eq!(list_parcels(&conn, 2, 1).unwrap().len(), 2);
    }

    #[test]
    fn test_empty_store_stats() {
        let conn = memory_store();
        let summary = summary_stats(&conn).unwrap();
        assert_eq!(summary.total_parcels, 0);
        assert_eq!(summary.total_area, 0.0);
        assert_eq!(summary.avg_announced_value, None);
    }

    #[test]
    fn test_checkpoint_runs() {
        let conn = memory_store();
        assert!(checkpoint(&conn).is_ok());
    }

    #[test]
    fn test_open_store_failure_is_fatal() {
        let err = open_store(Path::new("/nonexistent-dir/sub/land.db")).unwrap_err();
        assert!(err.is_fatal());
    }
}
