//! Oversized chunk compatibility
//!
//! A retired storage scheme split large chunks into the normal slot plus a
//! supplemental side payload. Reading such a chunk means appending the
//! supplement's entity and block-entity lists to the primary document.

use crate::document::{Compound, Tag};

/// Field holding the chunk body in the legacy layout
pub const LEVEL_FIELD: &str = "Level";

/// List fields the legacy scheme moved into the supplement
pub const MERGED_LISTS: [&str; 2] = ["Entities", "TileEntities"];

/// Merge a legacy supplement into its primary document
///
/// For each list in `MERGED_LISTS` under `Level`, the supplement's elements
/// are appended after the primary's, both in their original order. Missing
/// fields count as empty lists. Everything else comes from `primary`.
pub fn merge_oversized(mut primary: Compound, supplement: Option<&Compound>) -> Compound {
    let Some(extra_level) = supplement.and_then(|s| s.get_compound(LEVEL_FIELD)) else {
        return primary;
    };

    for field in MERGED_LISTS {
        let extra = extra_level.get_list(field);
        if extra.is_empty() {
            continue;
        }
        let level = primary.compound_entry(LEVEL_FIELD);
        let mut merged: Vec<Tag> = level.get_list(field).to_vec();
        merged.extend(extra.iter().cloned());
        level.insert(field, Tag::List(merged));
    }

    primary
}
