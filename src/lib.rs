//! exhume recovers deleted rows from SQLite database files.
//!
//! When a row is deleted without `PRAGMA secure_delete`, its bytes stay
//! behind: inside freeblocks on live table-leaf pages, and on whole
//! pages handed back to the free list.  This crate parses the file
//! format read-only, finds those freed regions, matches per-table byte
//! heuristics against them, and decodes the survivors back into typed
//! column values.
//!
//! System layers, leaves first:
//! * `varint`, `dbheader`, `pager` - raw bytes, the file header, and the
//!   in-memory page cache.
//! * `btree`, `schema` - page structure and the table catalog.
//! * `serial_type`, `record`, `overflow` - record decoding.
//! * `freelist`, `ptrmap`, `classify`, `freeblock` - the page graph and
//!   its freed corners.
//! * `heuristics`, `recover` - candidate search and orchestration.
//! * `csv_out` - output adapter.

pub mod btree;
pub mod classify;
pub mod csv_out;
pub mod dbheader;
pub mod freeblock;
pub mod freelist;
pub mod heuristics;
pub mod overflow;
pub mod pager;
pub mod ptrmap;
pub mod record;
pub mod recover;
pub mod schema;
pub mod serial_type;
pub mod sql_type;
pub mod sql_value;
pub mod varint;

// Page 1 (the first page) is always a btree page, and it is the root page
// of the schema table.  It has references to the root pages of other
// btrees.
pub const SCHEMA_BTREE_ROOT_PAGENUM: pager::PageNum = 1;
/// The schema table's columns: (type, name, tbl_name, rootpage, sql).
pub const SCHEMA_TABLE_COLUMNS: usize = 5;
