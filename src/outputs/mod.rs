//! Files written for other processes to read.
//!
//! - [`report`]: the JSON run report a single-source process hands back to
//!   the run coordinator
//!
//! ```text
//! staging_root/
//! └── .reports/
//!     ├── esbjerg-oekonomiudvalget.json
//!     └── aalborg-byraadet.json
//! ```

pub mod report;
