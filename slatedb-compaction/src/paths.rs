use crate::db_state::SsTableId;
use crate::db_state::SsTableId::{Compacted, Wal};
use crate::error::SlateDBError;
use object_store::path::Path;
use ulid::Ulid;

const WAL_PATH: &str = "wal";
const COMPACTED_PATH: &str = "compacted";

#[derive(Clone, Debug)]
pub(crate) struct PathResolver {
    root_path: Path,
}

impl PathResolver {
    pub(crate) fn new<P: Into<Path>>(root_path: P) -> Self {
        Self {
            root_path: root_path.into(),
        }
    }

    pub(crate) fn table_path(&self, table_id: &SsTableId) -> Path {
        match table_id {
            Wal(id) => Path::from(format!("{}/{}/{:020}.sst", &self.root_path, WAL_PATH, id)),
            Compacted(ulid) => Path::from(format!(
                "{}/{}/{}.sst",
                &self.root_path, COMPACTED_PATH, ulid
            )),
        }
    }

    pub(crate) fn compacted_path(&self) -> Path {
        self.root_path.child(COMPACTED_PATH)
    }

    /// Maps an object path back to the table id it was written under. Paths
    /// outside the wal and compacted directories resolve to `None`.
    pub(crate) fn parse_table_id(&self, path: &Path) -> Result<Option<SsTableId>, SlateDBError> {
        let Some(mut parts) = path.prefix_match(&self.root_path) else {
            return Ok(None);
        };
        let dir = parts.next();
        let stem = parts
            .next()
            .and_then(|file| file.as_ref().split('.').next().map(str::to_string));
        match (dir, stem) {
            (Some(dir), Some(stem)) if dir.as_ref() == WAL_PATH => stem
                .parse::<u64>()
                .map(|id| Some(Wal(id)))
                .map_err(|_| SlateDBError::InvalidDBState),
            (Some(dir), Some(stem)) if dir.as_ref() == COMPACTED_PATH => Ulid::from_string(&stem)
                .map(|id| Some(Compacted(id)))
                .map_err(|_| SlateDBError::InvalidDBState),
            _ => Ok(None),
        }
    }
}
