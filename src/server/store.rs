//! SQLite-backed heap.
//!
//! Object extents live in the `extents` table, capacities in `limits` as packed
//! magnitude records.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use rusqlite::{Connection, OptionalExtension};
use std::{fmt::Display, path::PathBuf, sync::Mutex};
use zcospace::{
    codec,
    heap::{self, Extent, HeapError, NewObject, Reservation},
    Direction, Heap, Magnitude, Medium, ObjectId, Space,
};

#[derive(Debug, Parser)]
pub(crate) struct StoreCli {
    #[arg(long, default_value = "zcospace.db")]
    store_path: PathBuf,

    /// Capacities of every medium.
    #[clap(flatten)]
    limits: LimitsCli,
}

/// Capacities, in bytes.
#[derive(Debug, Clone, Copy, Parser)]
pub(crate) struct LimitsCli {
    #[arg(long, default_value = "1000000000")]
    inbound_file: u64,
    #[arg(long, default_value = "1000000000")]
    inbound_bulk: u64,
    #[arg(long, default_value = "100000000")]
    inbound_heap: u64,
    #[arg(long, default_value = "1000000000")]
    outbound_file: u64,
    #[arg(long, default_value = "1000000000")]
    outbound_bulk: u64,
    #[arg(long, default_value = "100000000")]
    outbound_heap: u64,
}

impl LimitsCli {
    fn get(&self, direction: Direction, medium: Medium) -> u64 {
        match (direction, medium) {
            (Direction::Inbound, Medium::File) => self.inbound_file,
            (Direction::Inbound, Medium::Bulk) => self.inbound_bulk,
            (Direction::Inbound, Medium::Heap) => self.inbound_heap,
            (Direction::Outbound, Medium::File) => self.outbound_file,
            (Direction::Outbound, Medium::Bulk) => self.outbound_bulk,
            (Direction::Outbound, Medium::Heap) => self.outbound_heap,
        }
    }
}

fn backend(error: impl Display) -> HeapError {
    HeapError::Backend(error.to_string())
}

fn parse<T: ValueEnum>(text: &str) -> Result<T, HeapError> {
    T::from_str(text, false).map_err(backend)
}

pub(crate) struct SqliteHeap {
    conn: Mutex<Connection>,
}

impl SqliteHeap {
    pub(crate) fn open(cli: StoreCli) -> anyhow::Result<Self> {
        log::info!("Initialize store at {}", cli.store_path.display());
        let conn = Connection::open(&cli.store_path)
            .with_context(|| format!("cannot open {}", cli.store_path.display()))?;
        Self::init(conn, cli.limits)
    }

    #[cfg(test)]
    fn open_in_memory(limits: LimitsCli) -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?, limits)
    }

    fn init(conn: Connection, limits: LimitsCli) -> anyhow::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS objects (
                id BLOB PRIMARY KEY,
                direction TEXT NOT NULL,
                provisional INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS extents (
                object BLOB NOT NULL,
                seq INTEGER NOT NULL,
                medium TEXT NOT NULL,
                length INTEGER NOT NULL,
                PRIMARY KEY (object, seq)
            );
            CREATE TABLE IF NOT EXISTS limits (
                direction TEXT NOT NULL,
                medium TEXT NOT NULL,
                max BLOB NOT NULL,
                PRIMARY KEY (direction, medium)
            );",
        )?;

        for direction in Direction::ALL {
            for medium in Medium::ALL {
                let max = Magnitude::from(limits.get(direction, medium));
                log::debug!("{direction} {medium} capacity {max}");
                conn.execute(
                    "INSERT OR REPLACE INTO limits (direction, medium, max) VALUES (?, ?, ?)",
                    (
                        direction.to_string(),
                        medium.to_string(),
                        codec::encode_magnitude(&max)?.to_vec(),
                    ),
                )?;
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn max_occupancy(
    conn: &Connection,
    direction: Direction,
    medium: Medium,
) -> Result<Magnitude, HeapError> {
    let record: Option<Vec<u8>> = conn
        .query_row(
            "SELECT max FROM limits WHERE (direction, medium) = (?, ?)",
            (direction.to_string(), medium.to_string()),
            |row| row.get(0),
        )
        .optional()
        .map_err(backend)?;

    match record {
        Some(record) => Ok(codec::decode_magnitude(&record).map_err(backend)?.0),
        None => Ok(Magnitude::ZERO),
    }
}

fn occupancy(conn: &Connection, direction: Direction, medium: Medium) -> Result<Magnitude, HeapError> {
    let total: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(e.length), 0) FROM extents e
            JOIN objects o ON e.object = o.id
            WHERE o.direction = ? AND e.medium = ?",
            (direction.to_string(), medium.to_string()),
            |row| row.get(0),
        )
        .map_err(backend)?;
    Ok(Magnitude::new(total))
}

fn extents(conn: &Connection, object: ObjectId) -> Result<Vec<Extent>, HeapError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM objects WHERE id = ?",
            [object.as_bytes()],
            |_| Ok(()),
        )
        .optional()
        .map_err(backend)?;
    if found.is_none() {
        return Err(HeapError::NotFound(object));
    }

    let mut stmt = conn
        .prepare("SELECT medium, length FROM extents WHERE object = ? ORDER BY seq")
        .map_err(backend)?;
    let rows = stmt
        .query_map([object.as_bytes()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(backend)?;

    let extents = rows
        .map(|row| {
            let (medium, length) = row.map_err(backend)?;
            Ok((parse::<Medium>(&medium)?, length.unsigned_abs()))
        })
        .collect::<Result<Vec<_>, HeapError>>();
    extents
}

impl Heap for SqliteHeap {
    fn max_occupancy(&self, direction: Direction, medium: Medium) -> Result<Magnitude, HeapError> {
        max_occupancy(&self.conn.lock().expect("poisoned"), direction, medium)
    }

    fn occupancy(&self, direction: Direction, medium: Medium) -> Result<Magnitude, HeapError> {
        occupancy(&self.conn.lock().expect("poisoned"), direction, medium)
    }

    fn aggregate_length(
        &self,
        object: ObjectId,
        offset: u64,
        length: u64,
    ) -> Result<Space, HeapError> {
        let extents = extents(&self.conn.lock().expect("poisoned"), object)?;
        Ok(heap::aggregate(&heap::slice(&extents, offset, length)?))
    }

    fn create_object(&self, object: NewObject) -> Result<ObjectId, HeapError> {
        let mut conn = self.conn.lock().expect("poisoned");
        let tx = conn.transaction().map_err(backend)?;
        let extents = object.source.extents(|id| extents(&tx, id))?;

        if object.reservation == Reservation::Unreserved {
            for (medium, needed) in heap::aggregate(&extents).iter() {
                let mut available = max_occupancy(&tx, object.direction, medium)?;
                available -= occupancy(&tx, object.direction, medium)?;
                if needed > available.or_zero() {
                    return Err(HeapError::Insufficient(medium));
                }
            }
        }

        let id = ObjectId::generate();
        tx.execute(
            "INSERT INTO objects (id, direction, provisional) VALUES (?, ?, ?)",
            (
                id.as_bytes(),
                object.direction.to_string(),
                object.provisional,
            ),
        )
        .map_err(backend)?;
        for (seq, (medium, length)) in extents.iter().enumerate() {
            tx.execute(
                "INSERT INTO extents (object, seq, medium, length) VALUES (?, ?, ?, ?)",
                (id.as_bytes(), seq as i64, medium.to_string(), *length as i64),
            )
            .map_err(backend)?;
        }
        tx.commit().map_err(backend)?;

        log::debug!("{id} stored for {} with {extents:?}", object.direction);
        Ok(id)
    }

    fn destroy_object(&self, object: ObjectId) -> Result<Direction, HeapError> {
        let mut conn = self.conn.lock().expect("poisoned");
        let tx = conn.transaction().map_err(backend)?;
        let direction: String = tx
            .query_row(
                "SELECT direction FROM objects WHERE id = ?",
                [object.as_bytes()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?
            .ok_or(HeapError::NotFound(object))?;

        tx.execute("DELETE FROM extents WHERE object = ?", [object.as_bytes()])
            .map_err(backend)?;
        tx.execute("DELETE FROM objects WHERE id = ?", [object.as_bytes()])
            .map_err(backend)?;
        tx.commit().map_err(backend)?;

        log::debug!("{object} removed");
        parse(&direction)
    }
}
