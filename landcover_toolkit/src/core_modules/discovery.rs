// THEORY:
// Besides the static territory tables of a region, a user may keep their own
// tables under a personal `MAPBIOMAS` folder. Discovery lists the user's asset
// roots, picks the first one whose path contains `/MAPBIOMAS`, and appends that
// folder's assets after the static tables.
//
// Discovery is best-effort. A missing folder or a failed listing must never
// block the workflow, so any lookup failure falls back to the static list.

use crate::core_modules::catalog::RegionEntry;
use crate::error::Result;
use tracing::{debug, warn};

/// Marker a root path must contain to be scanned for user tables.
pub const USER_FOLDER_MARKER: &str = "/MAPBIOMAS";

/// Read access to an asset hierarchy.
pub trait AssetLister {
    /// Identifiers of the caller's top-level asset folders.
    fn asset_roots(&self) -> Result<Vec<String>>;

    /// Identifiers of the assets directly under `folder`.
    fn list_assets(&self, folder: &str) -> Result<Vec<String>>;
}

/// Table identifiers offered for `region`: static tables first, then any
/// discovered user tables.
pub fn discover_tables(region: &RegionEntry, lister: &dyn AssetLister) -> Vec<String> {
    let mut tables = region.table_assets();
    match user_tables(lister) {
        Ok(found) => {
            debug!(region = %region.key, count = found.len(), "discovered user tables");
            tables.extend(found);
        }
        Err(error) if error.is_recoverable_lookup() => {
            warn!(region = %region.key, %error, "table discovery failed, using static tables");
        }
        Err(error) => {
            warn!(region = %region.key, %error, "unexpected discovery error, using static tables");
        }
    }
    tables
}

fn user_tables(lister: &dyn AssetLister) -> Result<Vec<String>> {
    let roots = lister.asset_roots()?;
    let Some(root) = roots.iter().find(|r| r.contains(USER_FOLDER_MARKER)) else {
        debug!("no {USER_FOLDER_MARKER} folder among asset roots");
        return Ok(Vec::new());
    };
    lister.list_assets(root)
}
